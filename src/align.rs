//! CTC alignment collapse.
//!
//! A CTC model emits one token per frame, with a reserved blank id for
//! frames that carry no label. Collapsing a frame sequence drops the blanks
//! and, optionally, merges runs of the same token into one. A blank always
//! breaks a run: `4, 0, 4` with blank `0` collapses to `4, 4` even when
//! repeats are merged.
//!
//! Batches are stored flat, with a boundary list marking where each segment
//! starts and ends. Segments never influence each other.
use log::{debug, trace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::AlignConfig;
use crate::error::{Error, Result};
use crate::lod::{is_non_decreasing, Lod};
use crate::tensor::LodTensor;

pub type Token = i32;

/// Collapsed tokens of a whole batch together with their segment boundaries.
///
/// `boundaries` always starts at 0 and has one entry more than there are
/// segments, like the input boundary list it was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collapsed {
    pub tokens: Vec<Token>,
    pub boundaries: Vec<usize>,
}

impl Collapsed {
    pub fn num_segments(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    pub fn segment(&self, i: usize) -> Option<&[Token]> {
        let start = *self.boundaries.get(i)?;
        let end = *self.boundaries.get(i + 1)?;
        self.tokens.get(start..end)
    }

    /// Segments in order; stops at the first boundary pair that does not
    /// fit `tokens`.
    pub fn segments(&self) -> impl Iterator<Item = &[Token]> + '_ {
        self.boundaries
            .windows(2)
            .map_while(move |w| self.tokens.get(w[0]..w[1]))
    }
}

pub fn collapse_segment(segment: &[Token], blank: Token, merge_repeated: bool) -> Vec<Token> {
    let mut out = Vec::with_capacity(segment.len());
    collapse_segment_into(segment, blank, merge_repeated, &mut out);
    out
}

/// Collapse a single segment, appending the emitted tokens to `out`.
pub fn collapse_segment_into(
    segment: &[Token],
    blank: Token,
    merge_repeated: bool,
    out: &mut Vec<Token>,
) {
    let mut previous: Option<Token> = None;
    for &token in segment {
        if token != blank && !(merge_repeated && previous == Some(token)) {
            out.push(token);
        }
        // updated on blanks too, so a blank ends the current run
        previous = Some(token);
    }
}

/// Check that `boundaries` partitions a flat sequence of `len` tokens.
pub fn validate_boundaries(boundaries: &[usize], len: usize) -> Result<()> {
    let Some(&last) = boundaries.last() else {
        return Err(Error::invalid("boundary list is empty"));
    };
    if !is_non_decreasing(boundaries) {
        return Err(Error::invalid(format!(
            "boundaries must be non-decreasing, got {:?}",
            boundaries
        )));
    }
    if last != len {
        return Err(Error::invalid(format!(
            "last boundary {} does not match sequence length {}",
            last, len
        )));
    }
    Ok(())
}

/// Collapse every segment of a flat batch.
///
/// Fails with [`Error::InvalidInput`] before producing anything if the
/// boundaries are empty, decreasing, or do not end at `tokens.len()`.
pub fn collapse(
    tokens: &[Token],
    boundaries: &[usize],
    blank: Token,
    merge_repeated: bool,
) -> Result<Collapsed> {
    let config = AlignConfig::new()
        .with_blank(blank)
        .with_merge_repeated(merge_repeated)
        .with_parallel(false);
    collapse_with(tokens, boundaries, &config)
}

pub fn collapse_with(
    tokens: &[Token],
    boundaries: &[usize],
    config: &AlignConfig,
) -> Result<Collapsed> {
    config.validate()?;
    validate_boundaries(boundaries, tokens.len())?;

    let segments = boundaries.len() - 1;
    let parallel = config.use_parallel(segments);
    debug!(
        "collapsing {} tokens in {} segments (blank={}, merge_repeated={}, parallel={})",
        tokens.len(),
        segments,
        config.blank,
        config.merge_repeated,
        parallel
    );

    let mut out = Collapsed {
        tokens: Vec::with_capacity(tokens.len()),
        boundaries: Vec::with_capacity(boundaries.len()),
    };
    out.boundaries.push(0);

    if parallel {
        let pieces: Vec<Vec<Token>> = boundaries
            .par_windows(2)
            .map(|w| collapse_segment(&tokens[w[0]..w[1]], config.blank, config.merge_repeated))
            .collect();
        for piece in pieces {
            out.tokens.extend_from_slice(&piece);
            out.boundaries.push(out.tokens.len());
        }
    } else {
        for (i, w) in boundaries.windows(2).enumerate() {
            let before = out.tokens.len();
            collapse_segment_into(
                &tokens[w[0]..w[1]],
                config.blank,
                config.merge_repeated,
                &mut out.tokens,
            );
            trace!("segment {}: {} -> {} tokens", i, w[1] - w[0], out.tokens.len() - before);
            out.boundaries.push(out.tokens.len());
        }
    }

    Ok(out)
}

/// Operator form: collapse a `[rows, 1]` token tensor once per top-level
/// sequence and return a `[len, 1]` tensor with a one-level LoD.
pub fn ctc_align(input: &LodTensor, config: &AlignConfig) -> Result<LodTensor> {
    if input.width() != 1 {
        return Err(Error::invalid(format!(
            "ctc_align expects a column of tokens, got dims {:?}",
            input.dims()
        )));
    }
    if input.lod().is_empty() {
        return Err(Error::invalid("ctc_align input carries no LoD"));
    }
    // top level in row offsets, so nested sub-sequences collapse as one
    let absolute = input.lod().to_absolute()?;
    let boundaries = &absolute.levels()[0];

    let collapsed = collapse_with(input.data(), boundaries, config)?;
    LodTensor::column(collapsed.tokens, Lod::new(vec![collapsed.boundaries]))
}
