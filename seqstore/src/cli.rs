use clap::{Args as ClapArgs, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::PathBuf;

const DEFAULT_MAX_READ_LEN: &str = "255";
const DEFAULT_MAX_MEM: &str = "4294967296";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// `-q` only show errors and warnings. `-qq` only show errors. `-qqq` shows nothing.
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "verbose", global = true)]
    pub quiet: u8,

    /// `-v` show debug output. `-vv` show trace output.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a seqset and readmap from corrected reads
    Create(CreateArgs),
    /// Merge several stores into one
    Merge(MergeArgs),
    /// Migrate a readmap onto another seqset by sequence lookup
    MigrateReadmap(MigrateArgs),
}

#[derive(ClapArgs, Debug)]
pub struct CreateArgs {
    /// Input FASTA/FASTQ read files (gzip accepted)
    #[arg(name = "READS", required = true, value_parser = check_path_exists)]
    pub reads: Vec<PathBuf>,

    /// Reference FASTA used to seed the repo
    #[arg(short = 'r', long = "ref", value_name = "FASTA", value_parser = check_path_exists)]
    pub reference: Option<PathBuf>,

    /// Output directory for the store
    #[arg(short, long, value_name = "DIR")]
    pub out: PathBuf,

    /// Treat consecutive records as mate pairs
    #[arg(short, long)]
    pub paired: bool,

    /// Maximum read length
    #[arg(long, value_name = "INT", default_value = DEFAULT_MAX_READ_LEN)]
    pub max_read_len: u32,

    /// Keep each input record with this probability
    #[arg(long, value_name = "FLOAT", value_parser = validate_sample_rate)]
    pub sample: Option<f64>,

    /// Random seed for sampling - making a sampled build repeatable
    #[arg(short, long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Number of threads to use
    #[arg(short, long, value_name = "INT", default_value = "1")]
    pub threads: usize,

    /// Memory budget in bytes for the build
    #[arg(long, value_name = "BYTES", default_value = DEFAULT_MAX_MEM)]
    pub max_mem: u64,

    /// Don't clean up temporary files
    #[arg(short = 'C', long)]
    pub keep_temp: bool,

    /// Temporary directory for storing intermediate files
    #[arg(short = 'D', long = "temp", value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct MergeArgs {
    /// Input store directories
    #[arg(short, long = "in", value_name = "DIR", required = true, num_args = 1.., value_parser = check_path_exists)]
    pub inputs: Vec<PathBuf>,

    /// Output directory for the merged store
    #[arg(short, long, value_name = "DIR")]
    pub out: PathBuf,

    /// Number of threads to use
    #[arg(short, long, value_name = "INT", default_value = "1")]
    pub threads: usize,

    /// Don't clean up temporary files
    #[arg(short = 'C', long)]
    pub keep_temp: bool,

    /// Temporary directory for storing intermediate files
    #[arg(short = 'D', long = "temp", value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct MigrateArgs {
    /// Original seqset archive
    #[arg(long, value_name = "FILE", value_parser = check_path_exists)]
    pub orig_seqset: PathBuf,

    /// Original readmap archive
    #[arg(long, value_name = "FILE", value_parser = check_path_exists)]
    pub orig_readmap: PathBuf,

    /// New seqset archive to migrate onto
    #[arg(long, value_name = "FILE", value_parser = check_path_exists)]
    pub new_seqset: PathBuf,

    /// Output readmap archive
    #[arg(long, value_name = "FILE")]
    pub new_readmap: PathBuf,

    /// Drop reads whose entries are missing from the new seqset instead of
    /// failing
    #[arg(long)]
    pub drop_missing: bool,
}

/// A utility function that allows the CLI to error if a path doesn't exist
fn check_path_exists<S: AsRef<OsStr> + ?Sized>(s: &S) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("{} does not exist", path.to_string_lossy()))
    }
}

/// A value parser for the sampling rate
fn validate_sample_rate(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("`{}` is not a valid number", s))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("Value `{}` must be between 0.0 and 1.0", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    const BIN: &str = env!("CARGO_BIN_NAME");

    #[test]
    fn check_path_exists_it_doesnt() {
        let result = check_path_exists(OsStr::new("fake.path"));
        assert!(result.is_err())
    }

    #[test]
    fn check_path_it_does() {
        let actual = check_path_exists(OsStr::new("Cargo.toml")).unwrap();
        let expected = PathBuf::from("Cargo.toml");
        assert_eq!(actual, expected)
    }

    #[test]
    fn test_validate_sample_rate() {
        assert!(validate_sample_rate("0.5").is_ok());
        assert!(validate_sample_rate("0").is_ok());
        assert!(validate_sample_rate("1.0").is_ok());
        assert!(validate_sample_rate("1.5").is_err());
        assert!(validate_sample_rate("-0.1").is_err());
        assert!(validate_sample_rate("abc").is_err());
    }

    #[test]
    fn cli_no_args() {
        let opts = Args::try_parse_from([BIN]);
        assert!(opts.is_err());
    }

    #[test]
    fn cli_create_defaults() {
        let opts = Args::try_parse_from([BIN, "create", "Cargo.toml", "--out", "store"]).unwrap();
        match opts.command {
            Command::Create(args) => {
                assert_eq!(args.reads, vec![PathBuf::from("Cargo.toml")]);
                assert_eq!(args.out, PathBuf::from("store"));
                assert_eq!(args.max_read_len, 255);
                assert_eq!(args.threads, 1);
                assert!(!args.paired);
                assert!(args.reference.is_none());
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn cli_create_requires_reads() {
        let opts = Args::try_parse_from([BIN, "create", "--out", "store"]);
        assert!(opts.is_err());
    }

    #[test]
    fn cli_merge_multiple_inputs() {
        let opts =
            Args::try_parse_from([BIN, "merge", "--in", ".", "--in", ".", "--out", "merged"])
                .unwrap();
        match opts.command {
            Command::Merge(args) => {
                assert_eq!(args.inputs.len(), 2);
                assert_eq!(args.out, PathBuf::from("merged"));
            }
            _ => panic!("expected merge"),
        }
    }

    #[test]
    fn cli_migrate_readmap() {
        let opts = Args::try_parse_from([
            BIN,
            "migrate-readmap",
            "--orig-seqset",
            "Cargo.toml",
            "--orig-readmap",
            "Cargo.toml",
            "--new-seqset",
            "Cargo.toml",
            "--new-readmap",
            "out.readmap",
            "--drop-missing",
        ])
        .unwrap();
        match opts.command {
            Command::MigrateReadmap(args) => {
                assert!(args.drop_missing);
                assert_eq!(args.new_readmap, PathBuf::from("out.readmap"));
            }
            _ => panic!("expected migrate-readmap"),
        }
    }

    #[test]
    fn cli_with_quiet_verbose_conflict() {
        let opts = Args::try_parse_from([BIN, "create", "Cargo.toml", "--out", "x", "-qv"]);
        assert!(opts.is_err());
    }

    #[test]
    fn cli_bad_sample_rate() {
        let opts =
            Args::try_parse_from([BIN, "create", "Cargo.toml", "--out", "x", "--sample", "2"]);
        assert!(opts.is_err());
    }
}
