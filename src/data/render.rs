//! Rendering of a single HellaSwag record into the padded matrices a model
//! scores.
//!
//! Each of the four candidate rows is `context ++ ending`, right-padded with
//! zeros to the longest row. The mask marks the ending span of every row. The
//! padding id 0 is also a real GPT-2 token, so consumers must select positions
//! through the mask and never by comparing tokens against 0.

use std::ops::Range;

use serde::Serialize;

use super::{
    corpus::Record,
    tokenizer::{Tokenizer, TokenizerError},
};

/// Number of candidate endings per HellaSwag item.
pub const NUM_ENDINGS: usize = 4;

/// Dense row-major matrix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Matrix<T> {
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }
}

impl<T: Copy> Matrix<T> {
    #[must_use]
    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Row `i`. Panics if `i >= rows`.
    #[must_use]
    pub fn row(&self, i: usize) -> &[T] {
        assert!(i < self.rows, "row {i} out of bounds for {} rows", self.rows);
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    fn row_mut(&mut self, i: usize) -> &mut [T] {
        assert!(i < self.rows, "row {i} out of bounds for {} rows", self.rows);
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> Option<T> {
        if i < self.rows && j < self.cols {
            Some(self.data[i * self.cols + j])
        } else {
            None
        }
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.rows).map(move |i| self.row(i))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

/// One record rendered for scoring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RenderedExample {
    label: usize,
    context_tokens: Vec<u32>,
    ending_tokens: [Vec<u32>; NUM_ENDINGS],
    tokens: Matrix<u32>,
    mask: Matrix<u8>,
}

impl RenderedExample {
    /// Index of the correct ending.
    #[must_use]
    pub fn label(&self) -> usize {
        self.label
    }

    #[must_use]
    pub fn context_tokens(&self) -> &[u32] {
        &self.context_tokens
    }

    #[must_use]
    pub fn ending_tokens(&self) -> &[Vec<u32>; NUM_ENDINGS] {
        &self.ending_tokens
    }

    /// `(4, max_len)` token ids, zero padded.
    #[must_use]
    pub fn tokens(&self) -> &Matrix<u32> {
        &self.tokens
    }

    /// `(4, max_len)` 0/1 mask, 1 on ending positions only.
    #[must_use]
    pub fn mask(&self) -> &Matrix<u8> {
        &self.mask
    }

    #[must_use]
    pub fn max_len(&self) -> usize {
        self.tokens.cols()
    }

    /// Columns of row `i` holding ending tokens.
    #[must_use]
    pub fn ending_span(&self, i: usize) -> Range<usize> {
        let start = self.context_tokens.len();
        start..start + self.ending_tokens[i].len()
    }
}

/// Tokenize `record` and pack its four candidate rows.
///
/// Fails without producing any output when the record does not have exactly
/// four endings or its label does not index one of them. Tokenizer errors are
/// returned unchanged.
pub fn render<T: Tokenizer + ?Sized>(
    record: &Record,
    tokenizer: &T,
) -> Result<RenderedExample, RenderError> {
    let endings: &[String; NUM_ENDINGS] =
        record
            .endings
            .as_slice()
            .try_into()
            .map_err(|_| RenderError::WrongEndingCount {
                found: record.endings.len(),
            })?;
    if record.label >= NUM_ENDINGS {
        return Err(RenderError::LabelOutOfRange {
            label: record.label,
        });
    }

    let context_tokens = tokenizer.encode(&record.context)?;

    // The leading space reproduces GPT-2's word-boundary merge.
    let mut ending_tokens: [Vec<u32>; NUM_ENDINGS] = Default::default();
    for (slot, ending) in ending_tokens.iter_mut().zip(endings) {
        *slot = tokenizer.encode(&format!(" {ending}"))?;
    }

    let ctx_len = context_tokens.len();
    let max_len = ending_tokens
        .iter()
        .map(|end| ctx_len + end.len())
        .max()
        .unwrap_or(ctx_len);

    let mut tokens = Matrix::zeros(NUM_ENDINGS, max_len);
    let mut mask = Matrix::zeros(NUM_ENDINGS, max_len);
    for (i, end) in ending_tokens.iter().enumerate() {
        let span = ctx_len..ctx_len + end.len();

        let row = tokens.row_mut(i);
        row[..ctx_len].copy_from_slice(&context_tokens);
        row[span.clone()].copy_from_slice(end);

        mask.row_mut(i)[span].fill(1);
    }

    Ok(RenderedExample {
        label: record.label,
        context_tokens,
        ending_tokens,
        tokens,
        mask,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("expected 4 endings, found {found}")]
    WrongEndingCount { found: usize },
    #[error("label {label} does not index one of the 4 endings")]
    LabelOutOfRange { label: usize },
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
}
