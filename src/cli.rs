use clap::Parser;

use crate::options::{DigestCheck, ExtractOptions};

#[derive(Parser, Debug)]
#[command(name = "sealzip")]
#[command(version)]
#[command(about = "Extract and verify ZIP archives with SHA-256 digests and Merkle roots", long_about = None)]
#[command(after_help = "Examples:\n  \
  sealzip data1.zip -x joe        extract all files except joe from data1.zip\n  \
  sealzip -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  sealzip -t -P secret sealed.zip test every entry of an encrypted archive\n  \
  sealzip -m -l https://example.com/archive.zip   list a remote ZIP and print its Merkle root")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Test archive files (decompress and verify, write nothing)
    #[arg(short = 't')]
    pub test: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Password for encrypted entries
    #[arg(short = 'P', value_name = "PASSWORD", env = "SEALZIP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Print the archive's Merkle root
    #[arg(short = 'm')]
    pub merkle: bool,

    /// Skip SHA-256 verification (CRC-32 is still checked)
    #[arg(long = "skip-sha")]
    pub skip_sha: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Extraction settings selected by the flags.
    pub fn extract_options(&self) -> ExtractOptions {
        let mut options = ExtractOptions::new().digest_check(if self.skip_sha {
            DigestCheck::Skip
        } else {
            DigestCheck::IfPresent
        });
        if let Some(password) = &self.password {
            options = options.password(password.as_str());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_extract_options() {
        let cli = Cli::parse_from(["sealzip", "-t", "--skip-sha", "-P", "pw", "a.zip"]);
        assert!(cli.test);
        let options = cli.extract_options();
        assert_eq!(options.digest_check, DigestCheck::Skip);
        assert_eq!(options.password.as_ref().map(|p| p.as_bytes()), Some(&b"pw"[..]));

        let cli = Cli::parse_from(["sealzip", "-l", "https://example.com/a.zip"]);
        assert!(cli.is_http_url());
        assert_eq!(cli.extract_options().digest_check, DigestCheck::IfPresent);
    }
}
