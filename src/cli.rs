use clap::{Args, Parser, Subcommand};
use encoding_rs::Encoding;
use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

use crate::payload::{PayloadEntry, entries_from_paths};

#[derive(Parser, Debug)]
#[command(name = "zipglot")]
#[command(version)]
#[command(about = "Build ZIP polyglot files and inspect or edit ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipglot write-append --primary cover.jpg -o out.jpg notes.txt     image that is also a zip\n  \
  zipglot write-stub --template sh -o run.sh docs/a.md=README.md    script with a zip payload\n  \
  zipglot list-entries -l out.jpg                                   detailed listing\n  \
  zipglot extract out.jpg -d unpacked '*.txt'                       extract matching entries")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log every entry processed (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a payload and write it as a plain ZIP file
    BuildPayload {
        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Write a primary file followed by a ZIP payload
    WriteAppend {
        /// File whose bytes come first
        #[arg(long, value_name = "FILE")]
        primary: PathBuf,

        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Write an interpreter stub followed by a ZIP payload
    WriteStub {
        #[command(flatten)]
        stub: StubSource,

        /// Encoding of the stub text (WHATWG label)
        #[arg(long, value_name = "LABEL", default_value = "utf-8", value_parser = parse_encoding)]
        encoding: &'static Encoding,

        /// Also copy the result to <OUTPUT>.zip
        #[arg(long)]
        zip_sibling: bool,

        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// List the entries of an archive or polyglot
    ListEntries {
        /// Show sizes, ratio and modification time
        #[arg(short = 'l', long)]
        long: bool,

        archive: PathBuf,
    },

    /// Extract entries into a directory
    Extract {
        archive: PathBuf,

        /// Destination directory
        #[arg(short = 'd', long = "dir", value_name = "DIR")]
        destination: PathBuf,

        /// Entry names or glob patterns (default: all)
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },

    /// Delete entries from an archive in place
    DeleteEntries {
        archive: PathBuf,

        /// Entry names or glob patterns
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,
    },

    /// Create a ZIP archive on disk
    CreateZip {
        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Show where the trailing archive starts
    Locate { archive: PathBuf },

    /// List known primary/secondary type combinations
    Combinations {
        /// Only show the combination used for this primary type
        #[arg(value_name = "TYPE")]
        file_type: Option<String>,
    },

    /// List or print the built-in stub templates
    Templates {
        /// Template name or extension to print
        name: Option<String>,
    },
}

#[derive(Args, Debug)]
pub struct PayloadArgs {
    /// Output file
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Files to include, as PATH or NAME=PATH
    #[arg(value_name = "ENTRY", required = true)]
    pub entries: Vec<EntryArg>,
}

impl PayloadArgs {
    pub fn payload_entries(&self) -> Vec<PayloadEntry> {
        resolve_entries(&self.entries)
    }
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct StubSource {
    /// Read the stub text from a file
    #[arg(long, value_name = "FILE")]
    pub stub: Option<PathBuf>,

    /// Use a built-in stub (see `templates`)
    #[arg(long, value_name = "NAME")]
    pub template: Option<String>,
}

/// A command-line entry: `PATH`, or `NAME=PATH` to choose the archive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryArg {
    pub name: Option<String>,
    pub path: PathBuf,
}

impl FromStr for EntryArg {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('=') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => EntryArg {
                name: Some(name.to_string()),
                path: PathBuf::from(path),
            },
            _ => EntryArg {
                name: None,
                path: PathBuf::from(s),
            },
        })
    }
}

/// Turn entry arguments into payload entries, in order.
///
/// Bare paths are named after their file name, with colliding names made
/// unique. Explicit names are used as given.
pub fn resolve_entries(args: &[EntryArg]) -> Vec<PayloadEntry> {
    let bare: Vec<&PathBuf> = args
        .iter()
        .filter(|a| a.name.is_none())
        .map(|a| &a.path)
        .collect();
    let mut named_bare = entries_from_paths(&bare).into_iter();

    args.iter()
        .filter_map(|arg| match &arg.name {
            Some(name) => Some(PayloadEntry::new(name.clone(), arg.path.clone())),
            None => named_bare.next(),
        })
        .collect()
}

fn parse_encoding(label: &str) -> Result<&'static Encoding, String> {
    Encoding::for_label(label.as_bytes()).ok_or_else(|| format!("unknown encoding: {label}"))
}

/// Expand `patterns` against the archive's entry names.
///
/// Patterns with `*` or `?` select every matching name; plain names pass
/// through untouched, even when the archive does not contain them.
pub fn select_names(patterns: &[String], available: &[String]) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for pattern in patterns {
        if has_glob_chars(pattern) {
            selected.extend(
                available
                    .iter()
                    .filter(|name| glob_match(pattern, name))
                    .cloned(),
            );
        } else {
            selected.push(pattern.clone());
        }
    }
    let mut seen = std::collections::HashSet::new();
    selected.retain(|name| seen.insert(name.clone()));
    selected
}

/// Check if a pattern contains glob wildcard characters.
pub fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters, `/` included
/// - `?` matches exactly one character
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Skip the star, or let it swallow one more character
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn entry_args_split_on_the_first_equals() {
        let named: EntryArg = "docs/a.md=README.md".parse().unwrap();
        assert_eq!(named.name.as_deref(), Some("docs/a.md"));
        assert_eq!(named.path, PathBuf::from("README.md"));

        let bare: EntryArg = "photo.jpg".parse().unwrap();
        assert_eq!(bare.name, None);

        let leading: EntryArg = "=odd".parse().unwrap();
        assert_eq!(leading.name, None);
        assert_eq!(leading.path, PathBuf::from("=odd"));
    }

    #[test]
    fn bare_paths_are_disambiguated_in_order() {
        let args: Vec<EntryArg> = ["a/photo.jpg", "x.txt=notes.txt", "b/photo.jpg"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let names: Vec<_> = resolve_entries(&args)
            .into_iter()
            .map(|e| e.archive_name)
            .collect();
        assert_eq!(names, ["photo.jpg", "x.txt", "photo-2.jpg"]);
    }

    #[test]
    fn globs_expand_and_plain_names_pass_through() {
        let available: Vec<String> = ["a.txt", "b.png", "dir/c.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let patterns = vec!["*.txt".to_string(), "missing".to_string(), "a.txt".to_string()];
        assert_eq!(
            select_names(&patterns, &available),
            ["a.txt", "dir/c.txt", "missing"]
        );
    }

    #[test]
    fn glob_wildcards() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(!glob_match("?", ""));
    }

    #[test]
    fn write_stub_needs_exactly_one_stub_source() {
        let parse = |args: &[&str]| Cli::try_parse_from(args.iter().copied());
        assert!(parse(&["zipglot", "write-stub", "-o", "o", "a.txt"]).is_err());
        assert!(
            parse(&[
                "zipglot", "write-stub", "--stub", "s", "--template", "sh", "-o", "o", "a.txt"
            ])
            .is_err()
        );
        let cli = parse(&[
            "zipglot", "write-stub", "--template", "sh", "--encoding", "latin1", "-o", "o", "a.txt",
        ])
        .unwrap();
        match cli.command {
            Command::WriteStub { encoding, .. } => assert_eq!(encoding, encoding_rs::WINDOWS_1252),
            other => panic!("unexpected {other:?}"),
        }
    }
}
