//! PCR spec syntax (§6) and algorithm name parsing.
//!
//! Comma-separated list of decimal indices or closed ranges `a-b`; whitespace
//! is ignored. Duplicates collapse and input order is irrelevant — the
//! result is a plain bitmask, an idempotent union (§9 design note).

use crate::error::PcrSpecError;
use crate::hashalg::HashAlg;

pub const PCR_COUNT: u32 = 24;

/// Parses a `--pcrs` argument into a 24-bit mask. Rejects empty selections
/// and any index outside 0-23.
pub fn parse_pcr_spec(spec: &str) -> Result<u32, PcrSpecError> {
    let mut mask: u32 = 0;
    let mut saw_any = false;

    for raw_part in spec.split(',') {
        let part: String = raw_part.chars().filter(|c| !c.is_whitespace()).collect();
        if part.is_empty() {
            continue;
        }

        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo
                .parse()
                .map_err(|_| PcrSpecError::MalformedRange(part.clone()))?;
            let hi: u32 = hi
                .parse()
                .map_err(|_| PcrSpecError::MalformedRange(part.clone()))?;
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            for idx in lo..=hi {
                mask |= set_bit(idx)?;
                saw_any = true;
            }
        } else {
            let idx: u32 = part
                .parse()
                .map_err(|_| PcrSpecError::MalformedRange(part.clone()))?;
            mask |= set_bit(idx)?;
            saw_any = true;
        }
    }

    if !saw_any {
        return Err(PcrSpecError::Empty);
    }
    Ok(mask)
}

fn set_bit(idx: u32) -> Result<u32, PcrSpecError> {
    if idx >= PCR_COUNT {
        return Err(PcrSpecError::OutOfRange(idx));
    }
    Ok(1 << idx)
}

/// Parses an algorithm name accepted on the command line (§6).
pub fn parse_algorithm(name: &str) -> Result<HashAlg, PcrSpecError> {
    crate::hashalg::by_name(name).ok_or_else(|| PcrSpecError::UnknownAlgorithm(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert!(matches!(parse_pcr_spec(""), Err(PcrSpecError::Empty)));
        assert!(matches!(parse_pcr_spec("   "), Err(PcrSpecError::Empty)));
    }

    #[test]
    fn parses_indices_and_ranges() {
        assert_eq!(parse_pcr_spec("0,1,2").unwrap(), 0b111);
        assert_eq!(parse_pcr_spec("0-2").unwrap(), 0b111);
        assert_eq!(parse_pcr_spec(" 0 , 1-2 ").unwrap(), 0b111);
    }

    #[test]
    fn duplicates_and_unsorted_ranges_collapse_idempotently() {
        assert_eq!(parse_pcr_spec("0,0,1,1-0").unwrap(), 0b11);
        assert_eq!(parse_pcr_spec("2-0").unwrap(), parse_pcr_spec("0-2").unwrap());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            parse_pcr_spec("24"),
            Err(PcrSpecError::OutOfRange(24))
        ));
    }

    #[test]
    fn algorithm_names() {
        assert!(parse_algorithm("sha256").is_ok());
        assert!(parse_algorithm("sm3_256").is_ok());
        assert!(parse_algorithm("md5").is_err());
    }
}
