//! GRUB IPL decoders for pcr 8 (`grub_command`) and pcr 9 (`grub_file`) (§4.2, §4.3).

use std::path::Path;

use crate::error::ParseError;
use crate::hash::hash_one;
use crate::rehash::providers::ArtifactProvider;
use crate::rehash::RehashContext;

/// A GRUB file reference: either a plain path, or the `(device)path` form
/// GRUB uses to name a file on a specific device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrubFile {
    pub device: Option<String>,
    pub path: String,
}

pub fn parse_file(raw: &[u8]) -> Result<GrubFile, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf16)?;
    Ok(parse_grub_file_text(text))
}

fn parse_grub_file_text(text: &str) -> GrubFile {
    if let Some(rest) = text.strip_prefix('(') {
        if let Some(close) = rest.find(')') {
            let device = rest[..close].to_string();
            let path = rest[close + 1..].to_string();
            return GrubFile { device: Some(device), path };
        }
    }
    GrubFile { device: None, path: text.to_string() }
}

/// Rough classification of a GRUB file reference, used to pick the right
/// rehash source (§4.3 "GRUB file (pcr 9)").
enum FileClass {
    BootEntryFile,
    KernelImage,
    Initrd,
    Other,
}

fn classify(path: &str) -> FileClass {
    if path.contains("/loader/entries/") || path.ends_with(".conf") {
        FileClass::BootEntryFile
    } else if path.contains("vmlinuz") || path.contains("/linux") {
        FileClass::KernelImage
    } else if path.contains("initrd") || path.contains("initramfs") {
        FileClass::Initrd
    } else {
        FileClass::Other
    }
}

impl GrubFile {
    pub fn describe(&self) -> String {
        match &self.device {
            Some(d) => format!("GRUB file ({d}){}", self.path),
            None => format!("GRUB file {}", self.path),
        }
    }

    pub fn rehash(&self, ctx: &RehashContext, provider: &dyn ArtifactProvider) -> Option<Vec<u8>> {
        let alg = ctx.alg();
        match classify(&self.path) {
            FileClass::BootEntryFile => {
                let path = ctx.boot_entry_path.as_ref()?;
                let contents = provider.read_system_file(path).ok()?;
                Some(hash_one(alg, &contents))
            }
            FileClass::KernelImage => {
                let entry = ctx.boot_entry.as_ref()?;
                let contents = provider.read_efi_file(Path::new(&entry.image_path)).ok()?;
                Some(hash_one(alg, &contents))
            }
            FileClass::Initrd => {
                let entry = ctx.boot_entry.as_ref()?;
                let contents = provider.read_efi_file(Path::new(&entry.initrd_path)).ok()?;
                Some(hash_one(alg, &contents))
            }
            FileClass::Other => {
                let contents = match &self.device {
                    Some(_) => provider.read_efi_file(Path::new(&self.path)).ok()?,
                    None => provider.read_system_file(Path::new(&self.path)).ok()?,
                };
                Some(hash_one(alg, &contents))
            }
        }
    }
}

/// A GRUB command line from pcr 8: either a `grub_cmd` invocation (itself
/// `linux`/`initrd`, which name a file, or some other command kept as plain
/// text) or a `kernel_cmdline` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrubCommand {
    Linux(GrubFile),
    Initrd(GrubFile),
    Plain(String),
    KernelCmdline(String),
}

pub fn parse_command(raw: &[u8]) -> Result<GrubCommand, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf16)?;
    let (keyword, arg) = text.split_once(':').ok_or(ParseError::Truncated(0))?;
    let arg = arg.trim_start();

    match keyword.trim() {
        "grub_cmd" => {
            if let Some(rest) = arg.strip_prefix("linux ") {
                Ok(GrubCommand::Linux(parse_grub_file_text(rest.trim())))
            } else if let Some(rest) = arg.strip_prefix("initrd ") {
                Ok(GrubCommand::Initrd(parse_grub_file_text(rest.trim())))
            } else {
                Ok(GrubCommand::Plain(arg.to_string()))
            }
        }
        "kernel_cmdline" => Ok(GrubCommand::KernelCmdline(arg.to_string())),
        _ => Ok(GrubCommand::Plain(text.to_string())),
    }
}

impl GrubCommand {
    pub fn describe(&self) -> String {
        match self {
            GrubCommand::Linux(f) => format!("grub_cmd linux {}", f.describe()),
            GrubCommand::Initrd(f) => format!("grub_cmd initrd {}", f.describe()),
            GrubCommand::Plain(s) => format!("grub_cmd {s}"),
            GrubCommand::KernelCmdline(s) => format!("kernel_cmdline {s}"),
        }
    }

    /// Rebuilds the command text against the next boot's kernel/initrd path,
    /// appending the next boot's command line for `linux`/`kernel_cmdline`
    /// (§4.3 "GRUB command (pcr 8)").
    pub fn rebuild(&self, ctx: &RehashContext) -> Option<String> {
        let entry = ctx.boot_entry.as_ref()?;
        match self {
            GrubCommand::Linux(f) => Some(format!(
                "grub_cmd: linux {}{} {}",
                device_prefix(&f.device),
                entry.image_path,
                entry.options
            )),
            GrubCommand::Initrd(f) => Some(format!(
                "grub_cmd: initrd {}{}",
                device_prefix(&f.device),
                entry.initrd_path
            )),
            GrubCommand::KernelCmdline(_) => Some(format!("kernel_cmdline: {}", entry.options)),
            GrubCommand::Plain(_) => None,
        }
    }

    pub fn rehash(&self, ctx: &RehashContext) -> Option<Vec<u8>> {
        let rebuilt = self.rebuild(ctx)?;
        Some(hash_one(ctx.alg(), rebuilt.as_bytes()))
    }
}

fn device_prefix(device: &Option<String>) -> String {
    match device {
        Some(d) => format!("({d})"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_device_qualified_paths() {
        assert_eq!(
            parse_grub_file_text("/boot/vmlinuz-6.4"),
            GrubFile { device: None, path: "/boot/vmlinuz-6.4".to_string() }
        );
        assert_eq!(
            parse_grub_file_text("(hd0,gpt2)/boot/vmlinuz-6.4"),
            GrubFile { device: Some("hd0,gpt2".to_string()), path: "/boot/vmlinuz-6.4".to_string() }
        );
    }

    #[test]
    fn parses_grub_cmd_linux_and_initrd() {
        let linux = parse_command(b"grub_cmd: linux /boot/vmlinuz-6.4").unwrap();
        assert!(matches!(linux, GrubCommand::Linux(GrubFile { path, .. }) if path == "/boot/vmlinuz-6.4"));

        let initrd = parse_command(b"grub_cmd: initrd /boot/initrd.img-6.4").unwrap();
        assert!(matches!(initrd, GrubCommand::Initrd(GrubFile { path, .. }) if path == "/boot/initrd.img-6.4"));
    }

    #[test]
    fn parses_kernel_cmdline() {
        let cmd = parse_command(b"kernel_cmdline: root=/dev/sda1 ro").unwrap();
        assert_eq!(cmd, GrubCommand::KernelCmdline("root=/dev/sda1 ro".to_string()));
    }
}
