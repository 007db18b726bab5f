use std::path::{Path, PathBuf};

/// Which of the three link-graph dump tables a file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Page,
    LinkTarget,
    PageLinks,
}

impl DumpKind {
    pub fn table_name(self) -> &'static str {
        match self {
            DumpKind::Page => "page",
            DumpKind::LinkTarget => "linktarget",
            DumpKind::PageLinks => "pagelinks",
        }
    }
}

/// Descriptor of one compressed dump file on disk. Immutable once built.
#[derive(Debug, Clone)]
pub struct WikiFile {
    pub lang_code: String,
    pub date: String,
    pub kind: DumpKind,
    pub data_path: PathBuf,
    /// Explicit decompression index location; defaults to `{data_path}.gzi`.
    pub index_path: Option<PathBuf>,
}

impl WikiFile {
    /// Build the descriptor for `{lang}wiki-{date}-{table}.sql.gz` under `data_dir`.
    pub fn locate(data_dir: &Path, lang: &str, date: &str, kind: DumpKind) -> Self {
        let file_name = format!("{lang}wiki-{date}-{}.sql.gz", kind.table_name());
        Self {
            lang_code: lang.to_string(),
            date: date.to_string(),
            kind,
            data_path: data_dir.join(file_name),
            index_path: None,
        }
    }

    pub fn resolved_index_path(&self) -> PathBuf {
        match &self.index_path {
            Some(path) => path.clone(),
            None => {
                let mut path = self.data_path.clone().into_os_string();
                path.push(".gzi");
                PathBuf::from(path)
            }
        }
    }
}

/// The three dump files that together describe one wiki's link graph.
#[derive(Debug, Clone)]
pub struct WikiDump {
    pub lang_code: String,
    pub date: String,
    pub page: WikiFile,
    pub linktarget: WikiFile,
    pub pagelinks: WikiFile,
}

impl WikiDump {
    pub fn locate(data_dir: &Path, lang: &str, date: &str) -> Self {
        Self {
            lang_code: lang.to_string(),
            date: date.to_string(),
            page: WikiFile::locate(data_dir, lang, date, DumpKind::Page),
            linktarget: WikiFile::locate(data_dir, lang, date, DumpKind::LinkTarget),
            pagelinks: WikiFile::locate(data_dir, lang, date, DumpKind::PageLinks),
        }
    }
}

/// One main-namespace article. Its position in the pages vector is the
/// graph's node identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub title: String,
    pub is_redirect: bool,
}

/// A directed edge between two page indices (not Wikipedia page ids).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub from: u32,
    pub to: u32,
}
