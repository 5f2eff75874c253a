//! Static knowledge about supported file types, the polyglot
//! combinations that are known to work, and the built-in stub scripts.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::polyglot::CompositionStrategy;
use CompositionStrategy::{AppendAfterPrimary, StubPlusZip};
use FileType::{Gif, Jpeg, Mp3, Mp4, Pdf, Png, Script, Text, Zip};

/// Coarse file type, detected from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Pdf,
    Zip,
    Jpeg,
    Png,
    Gif,
    Mp3,
    Mp4,
    Text,
    Script,
    Unknown,
}

const EXTENSIONS: &[(FileType, &[&str])] = &[
    (FileType::Pdf, &["pdf"]),
    (FileType::Zip, &["zip"]),
    (FileType::Jpeg, &["jpg", "jpeg"]),
    (FileType::Png, &["png"]),
    (FileType::Gif, &["gif"]),
    (FileType::Mp3, &["mp3"]),
    (FileType::Mp4, &["mp4"]),
    (FileType::Text, &["txt", "csv", "log", "md", "html", "htm"]),
    (FileType::Script, &["bat", "cmd", "ps1", "sh", "bash", "py"]),
];

impl FileType {
    pub fn detect(path: &Path) -> FileType {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return FileType::Unknown;
        };
        let ext = ext.to_ascii_lowercase();
        EXTENSIONS
            .iter()
            .find(|(_, exts)| exts.contains(&ext.as_str()))
            .map(|(ty, _)| *ty)
            .unwrap_or(FileType::Unknown)
    }

    /// Extensions (without the dot) that map to this type.
    pub fn extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
            .iter()
            .find(|(ty, _)| ty == self)
            .map(|(_, exts)| *exts)
            .unwrap_or(&[])
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileType::Pdf => "PDF",
            FileType::Zip => "ZIP",
            FileType::Jpeg => "JPEG",
            FileType::Png => "PNG",
            FileType::Gif => "GIF",
            FileType::Mp3 => "MP3",
            FileType::Mp4 => "MP4",
            FileType::Text => "TXT",
            FileType::Script => "SCRIPT",
            FileType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        [
            FileType::Pdf,
            FileType::Zip,
            FileType::Jpeg,
            FileType::Png,
            FileType::Gif,
            FileType::Mp3,
            FileType::Mp4,
            FileType::Text,
            FileType::Script,
        ]
        .into_iter()
        .find(|ty| ty.name() == upper || ty.extensions().contains(&s.to_ascii_lowercase().as_str()))
        .ok_or_else(|| format!("unknown file type: {s}"))
    }
}

/// A primary type, the secondary types it can carry, and how they combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinationDescriptor {
    pub label: &'static str,
    pub primary: FileType,
    pub secondaries: &'static [FileType],
    pub strategy: CompositionStrategy,
}

pub const COMBINATIONS: &[CombinationDescriptor] = &[
    CombinationDescriptor {
        label: "TXT + Images",
        primary: Text,
        secondaries: &[Jpeg, Png, Gif],
        strategy: AppendAfterPrimary,
    },
    CombinationDescriptor {
        label: "PDF + Images",
        primary: Pdf,
        secondaries: &[Jpeg, Png, Gif],
        strategy: AppendAfterPrimary,
    },
    CombinationDescriptor {
        label: "JPEG + Extras",
        primary: Jpeg,
        secondaries: &[Text, Png, Gif, Mp3, Mp4],
        strategy: AppendAfterPrimary,
    },
    CombinationDescriptor {
        label: "PNG + Extras",
        primary: Png,
        secondaries: &[Text, Jpeg, Gif, Mp3, Mp4],
        strategy: AppendAfterPrimary,
    },
    CombinationDescriptor {
        label: "GIF + Extras",
        primary: Gif,
        secondaries: &[Text, Jpeg, Png, Mp3, Mp4],
        strategy: AppendAfterPrimary,
    },
    CombinationDescriptor {
        label: "MP3 + Text",
        primary: Mp3,
        secondaries: &[Text],
        strategy: AppendAfterPrimary,
    },
    CombinationDescriptor {
        label: "MP4 + Text",
        primary: Mp4,
        secondaries: &[Text],
        strategy: AppendAfterPrimary,
    },
    CombinationDescriptor {
        label: "Batch (.bat) + Payload",
        primary: Script,
        secondaries: &[Text, Jpeg, Png, Gif, Mp3, Mp4],
        strategy: StubPlusZip,
    },
    CombinationDescriptor {
        label: "PowerShell (.ps1) + Payload",
        primary: Script,
        secondaries: &[Text, Jpeg, Png, Gif],
        strategy: StubPlusZip,
    },
    CombinationDescriptor {
        label: "Shell (.sh/.bash) + Payload",
        primary: Script,
        secondaries: &[Text, Jpeg, Png],
        strategy: StubPlusZip,
    },
    CombinationDescriptor {
        label: "Python (.py) + Payload",
        primary: Script,
        secondaries: &[Text, Png, Gif],
        strategy: StubPlusZip,
    },
    CombinationDescriptor {
        label: "ZIP only (container)",
        primary: Zip,
        secondaries: &[],
        strategy: AppendAfterPrimary,
    },
];

/// The first known combination whose primary is `ty`.
pub fn find_combination_for_type(ty: FileType) -> Option<&'static CombinationDescriptor> {
    COMBINATIONS.iter().find(|c| c.primary == ty)
}

/// Built-in stubs that print a notice and exit before reaching the payload.
pub const STUB_TEMPLATES: &[(&str, &str)] = &[
    (
        "Batch (.bat)",
        "@echo off\r\n\
         rem --- Self-extract notice ---\r\n\
         echo %~nx0 has a ZIP payload at the end. Open with an unzip tool to extract.\r\n\
         exit /b 0\r\n",
    ),
    (
        "PowerShell (.ps1)",
        "# Self-extract notice\n\
         Write-Host \"$($MyInvocation.MyCommand.Name) has a ZIP payload at the end. Open with an unzip tool.\"\n\
         exit 0\n",
    ),
    (
        "POSIX sh (.sh)",
        "#!/bin/sh\n\
         echo \"$(basename \"$0\") has a ZIP payload at the end. Open with an unzip tool.\"\n\
         exit 0\n",
    ),
    (
        "Bash (.bash)",
        "#!/usr/bin/env bash\n\
         echo \"$(basename \"$0\") has a ZIP payload at the end. Open with an unzip tool.\"\n\
         exit 0\n",
    ),
    (
        "Python (.py)",
        "# Self-extract notice\n\
         print(f\"{__file__} has a ZIP payload at the end. Open with an unzip tool.\")\n",
    ),
];

/// Look a template up by its full name or by extension (`"sh"`, `".ps1"`).
pub fn stub_template(name: &str) -> Option<&'static str> {
    let wanted = name.trim().trim_start_matches('.').to_ascii_lowercase();
    STUB_TEMPLATES
        .iter()
        .find(|(label, _)| {
            label.eq_ignore_ascii_case(name.trim()) || label.ends_with(&format!("(.{wanted})"))
        })
        .map(|(_, text)| *text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_ignores_case() {
        assert_eq!(FileType::detect(Path::new("a/B.JPEG")), FileType::Jpeg);
        assert_eq!(FileType::detect(Path::new("notes.md")), FileType::Text);
        assert_eq!(FileType::detect(Path::new("run.ps1")), FileType::Script);
        assert_eq!(FileType::detect(Path::new("Makefile")), FileType::Unknown);
        assert_eq!(FileType::detect(Path::new("x.exe")), FileType::Unknown);
    }

    #[test]
    fn type_names_and_extensions_parse() {
        assert_eq!("pdf".parse::<FileType>().unwrap(), FileType::Pdf);
        assert_eq!("TXT".parse::<FileType>().unwrap(), FileType::Text);
        assert_eq!("jpg".parse::<FileType>().unwrap(), FileType::Jpeg);
        assert!("exe".parse::<FileType>().is_err());
    }

    #[test]
    fn first_matching_combination_wins() {
        let script = find_combination_for_type(FileType::Script).unwrap();
        assert_eq!(script.label, "Batch (.bat) + Payload");
        assert_eq!(script.strategy, CompositionStrategy::StubPlusZip);

        let zip = find_combination_for_type(FileType::Zip).unwrap();
        assert!(zip.secondaries.is_empty());

        assert!(find_combination_for_type(FileType::Unknown).is_none());
    }

    #[test]
    fn every_template_ends_with_a_newline() {
        for (name, text) in STUB_TEMPLATES {
            assert!(text.ends_with('\n'), "{name}");
        }
    }

    #[test]
    fn templates_resolve_by_name_or_extension() {
        assert!(stub_template("POSIX sh (.sh)").unwrap().starts_with("#!/bin/sh"));
        assert!(stub_template("sh").unwrap().starts_with("#!/bin/sh"));
        assert!(stub_template(".bash").unwrap().starts_with("#!/usr/bin/env bash"));
        assert!(stub_template("BAT").unwrap().starts_with("@echo off"));
        assert!(stub_template("lua").is_none());
    }
}
