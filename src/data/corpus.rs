//! Streaming access to the records of a split.

use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::{
    fetch::{FetchError, Fetcher, HttpTransport, Transport},
    render::{render, RenderError, RenderedExample},
    split::Split,
    tokenizer::Tokenizer,
};
use crate::config::HellaSwagConfig;

/// One HellaSwag item as stored in the JSON-lines files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "ctx")]
    pub context: String,
    pub endings: Vec<String>,
    pub label: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ind: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_type: Option<String>,
}

impl Record {
    pub fn new<S: Into<String>>(
        context: impl Into<String>,
        endings: impl IntoIterator<Item = S>,
        label: usize,
    ) -> Self {
        Self {
            context: context.into(),
            endings: endings.into_iter().map(Into::into).collect(),
            label,
            ind: None,
            activity_label: None,
            source_id: None,
            split_type: None,
        }
    }
}

/// Lazily decoded records of one JSON-lines file, in file order.
///
/// The file handle is dropped as soon as the last line has been read. An I/O
/// error ends the iteration; a malformed line is reported and iteration may
/// continue with the next one.
pub struct Records {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    line: usize,
}

impl Records {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let path = path.into();
        let file = File::open(&path).map_err(|source| CorpusError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            lines: Some(BufReader::new(file).lines()),
            line: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 1-based number of the last line read.
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }
}

impl Iterator for Records {
    type Item = Result<Record, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        let Some(next) = self.lines.as_mut()?.next() else {
            self.lines = None;
            return None;
        };
        self.line += 1;

        let text = match next {
            Ok(text) => text,
            Err(source) => {
                self.lines = None;
                return Some(Err(CorpusError::Io {
                    path: self.path.clone(),
                    source,
                }));
            }
        };

        Some(
            serde_json::from_str(&text).map_err(|source| CorpusError::Parse {
                path: self.path.clone(),
                line: self.line,
                source,
            }),
        )
    }
}

/// Entry point for callers: fetches a split on first use and streams it.
pub struct Corpus<T: Transport = HttpTransport> {
    fetcher: Fetcher<T>,
}

impl Corpus<HttpTransport> {
    #[must_use]
    pub fn from_config(config: &HellaSwagConfig) -> Self {
        Self::new(Fetcher::from_config(config))
    }
}

impl<T: Transport> Corpus<T> {
    pub fn new(fetcher: Fetcher<T>) -> Self {
        Self { fetcher }
    }

    #[must_use]
    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    /// Records of `split` from the start of the file. Each call re-opens it.
    pub fn records(&self, split: Split) -> Result<Records, CorpusError> {
        let path = self.fetcher.ensure_local(split)?;
        Records::open(path)
    }

    /// Records of `split` rendered one at a time with `tokenizer`.
    pub fn render_split<'a, K: Tokenizer + ?Sized>(
        &self,
        split: Split,
        tokenizer: &'a K,
    ) -> Result<RenderedRecords<'a, K>, CorpusError> {
        Ok(RenderedRecords {
            records: self.records(split)?,
            tokenizer,
        })
    }
}

/// [`Records`] mapped through [`render`].
pub struct RenderedRecords<'a, K: ?Sized> {
    records: Records,
    tokenizer: &'a K,
}

impl<K: Tokenizer + ?Sized> Iterator for RenderedRecords<'_, K> {
    type Item = Result<RenderedExample, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        let line = self.records.line();
        Some(record.and_then(|record| {
            render(&record, self.tokenizer)
                .map_err(|source| CorpusError::Render { line, source })
        }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:{line}: malformed record: {source}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("record on line {line}: {source}")]
    Render {
        line: usize,
        #[source]
        source: RenderError,
    },
}
