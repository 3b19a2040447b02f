use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::flags;

#[derive(Parser, Debug)]
#[command(name = "ziparc")]
#[command(version)]
#[command(about = "Inspect and edit zip archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  ziparc data.zip list -v                      list entries with sizes and dates\n  \
  ziparc data.zip cat readme.txt | more        print an entry\n  \
  ziparc --create new.zip add notes.txt --text hi   create an archive with one entry\n  \
  ziparc new.zip copy data.zip readme.txt      copy an entry between archives\n\n\
Set RUST_LOG=debug to trace handle lifetimes.")]
pub struct Cli {
    /// ZIP archive path
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Create the archive if it does not exist
    #[arg(short = 'c', long, global = true)]
    pub create: bool,

    /// Fail if the archive already exists (with --create)
    #[arg(long, global = true, requires = "create")]
    pub excl: bool,

    /// Cross-check local headers against the central directory on open
    #[arg(long, global = true)]
    pub checkcons: bool,

    /// Match entry names ignoring ASCII case
    #[arg(short = 'i', long, global = true)]
    pub nocase: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List entries
    List {
        /// Show sizes, compression ratio and timestamps
        #[arg(short = 'v')]
        verbose: bool,

        /// Only entries matching these patterns (`*` and `?` wildcards)
        #[arg(value_name = "PATTERNS")]
        patterns: Vec<String>,
    },

    /// Write entries to stdout
    Cat {
        #[arg(value_name = "NAMES", required = true)]
        names: Vec<String>,
    },

    /// Add or replace an entry
    Add(AddArgs),

    /// Add a directory entry
    Mkdir {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Delete entries
    Rm {
        #[arg(value_name = "NAMES", required = true)]
        names: Vec<String>,
    },

    /// Rename an entry
    Mv {
        #[arg(value_name = "FROM")]
        from: String,
        #[arg(value_name = "TO")]
        to: String,
    },

    /// Show or change the archive comment
    Comment {
        /// New comment; an empty string removes it
        #[arg(long, value_name = "TEXT")]
        set: Option<String>,
    },

    /// Copy an entry from another archive
    Copy {
        /// Archive to copy from
        #[arg(value_name = "OTHER")]
        other: PathBuf,

        /// Entry in OTHER
        #[arg(value_name = "ENTRY")]
        entry: String,

        /// Name in this archive (default: same as ENTRY)
        #[arg(long = "as", value_name = "NAME")]
        rename: Option<String>,

        /// Decompress and compress again instead of copying raw
        #[arg(long)]
        recompress: bool,
    },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Entry name
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Take the content from a file
    #[arg(
        short = 'f',
        long,
        value_name = "PATH",
        conflicts_with = "text",
        required_unless_present = "text"
    )]
    pub file: Option<PathBuf>,

    /// Use this text as the content
    #[arg(short = 't', long, value_name = "TEXT")]
    pub text: Option<String>,
}

impl Cli {
    pub fn open_flags(&self) -> u32 {
        let mut bits = 0;
        if self.create {
            bits |= flags::CREATE;
        }
        if self.excl {
            bits |= flags::EXCL;
        }
        if self.checkcons {
            bits |= flags::CHECKCONS;
        }
        bits
    }

    pub fn lookup_flags(&self) -> u32 {
        if self.nocase { flags::FL_NOCASE } else { 0 }
    }
}
