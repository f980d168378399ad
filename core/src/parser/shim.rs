//! shim IPL event decoder, pcr 14 (§4.2).
//!
//! shim records its own internal variable names rather than the EFI runtime
//! variable names they correspond to; this table performs that resolution.
//! No rehash rule is specified for shim events (§4.3 enumerates a rule for
//! every other variant); they always fall back to the copy strategy.

use crate::error::ParseError;

const SHIM_VARIABLE_TABLE: &[(&str, &str)] = &[
    ("MokListTrusted", "MokListTrusted"),
    ("MokList", "MokListRT"),
    ("MokListX", "MokListXRT"),
    ("SbatLevel", "SbatLevelRT"),
    ("MokSBState", "MokSBStateRT"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimVariable {
    pub raw_name: String,
    pub resolved_name: String,
}

pub fn parse(raw: &[u8]) -> Result<ShimVariable, ParseError> {
    let raw_name = std::str::from_utf8(raw)
        .map_err(|_| ParseError::InvalidUtf16)?
        .trim_end_matches('\0')
        .to_string();

    let resolved_name = SHIM_VARIABLE_TABLE
        .iter()
        .find(|(k, _)| *k == raw_name)
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| ParseError::UnknownShimVariable(raw_name.clone()))?;

    Ok(ShimVariable { raw_name, resolved_name })
}

impl ShimVariable {
    pub fn describe(&self) -> String {
        format!("shim variable {:?} -> {:?}", self.raw_name, self.resolved_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_variable() {
        let parsed = parse(b"MokList\0").unwrap();
        assert_eq!(parsed.resolved_name, "MokListRT");
    }

    #[test]
    fn rejects_unknown_variable() {
        let err = parse(b"SomethingElse").unwrap_err();
        assert!(matches!(err, ParseError::UnknownShimVariable(_)));
    }
}
