//! Per-frame pass ordering with explicit buffer dependencies.
//!
//! Each pass declares the buffers it reads, writes and consumes as indirect
//! arguments. A [`FramePlan`] is checked once when a scene becomes ready: every
//! per-frame buffer must be written by an earlier pass of the same plan before
//! anything reads it, which is what lets a frame reuse last frame's scratch
//! buffers with no host synchronization.

use std::fmt;

use crate::error::{SplatError, SplatResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Uniforms,
    RawGaussians,
    ShCoefficients,
    Processed,
    SortKeys,
    SortValues,
    SortState,
    SortDispatch,
    SortHistograms,
    RenderIndirect,
}

impl Resource {
    /// Contents carried over from the previous frame are stale and must be
    /// rewritten before use. Uniforms are written by the host before submit,
    /// scene buffers at load.
    pub fn is_per_frame(self) -> bool {
        !matches!(self, Self::Uniforms | Self::RawGaussians | Self::ShCoefficients)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PassKind {
    ResetSortState,
    Preprocess,
    Sort,
    CopyVisibleCount,
    Draw,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResetSortState => "reset sort state",
            Self::Preprocess => "preprocess",
            Self::Sort => "sort",
            Self::CopyVisibleCount => "copy visible count",
            Self::Draw => "draw",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassNode {
    pub kind: PassKind,
    pub reads: Vec<Resource>,
    pub writes: Vec<Resource>,
    pub indirect: Vec<Resource>,
}

impl PassNode {
    /// The standard resource usage of `kind`.
    pub fn new(kind: PassKind, compressed: bool) -> Self {
        use Resource::*;
        let (reads, writes, indirect) = match kind {
            PassKind::ResetSortState => (vec![], vec![SortState, SortDispatch], vec![]),
            PassKind::Preprocess => {
                let mut reads = vec![Uniforms, RawGaussians, SortState, SortDispatch];
                if compressed {
                    reads.push(ShCoefficients);
                }
                (reads, vec![Processed, SortKeys, SortValues, SortState, SortDispatch], vec![])
            }
            PassKind::Sort => (
                vec![SortKeys, SortValues, SortState],
                vec![SortKeys, SortValues, SortHistograms],
                vec![SortDispatch],
            ),
            PassKind::CopyVisibleCount => (vec![SortState], vec![RenderIndirect], vec![]),
            PassKind::Draw => (vec![Uniforms, Processed, SortValues], vec![], vec![RenderIndirect]),
        };
        Self { kind, reads, writes, indirect }
    }
}

/// "`producer` writes `resource`, which `consumer` reads as indirect arguments."
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IndirectEdge {
    pub producer: PassKind,
    pub consumer: PassKind,
    pub resource: Resource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    passes: Vec<PassNode>,
}

impl FramePlan {
    pub fn new(passes: Vec<PassNode>) -> Self {
        Self { passes }
    }

    /// Reset, preprocess, sort, copy visible count, draw.
    pub fn standard(compressed: bool) -> Self {
        Self::new(
            [
                PassKind::ResetSortState,
                PassKind::Preprocess,
                PassKind::Sort,
                PassKind::CopyVisibleCount,
                PassKind::Draw,
            ]
            .into_iter()
            .map(|kind| PassNode::new(kind, compressed))
            .collect(),
        )
    }

    pub fn passes(&self) -> &[PassNode] {
        &self.passes
    }

    pub fn kinds(&self) -> impl Iterator<Item = PassKind> + '_ {
        self.passes.iter().map(|p| p.kind)
    }

    /// Index of the last pass before `before` that writes `resource`.
    fn last_writer(&self, resource: Resource, before: usize) -> Option<usize> {
        self.passes[..before]
            .iter()
            .rposition(|p| p.writes.contains(&resource))
    }

    pub fn validate(&self) -> SplatResult<()> {
        for (i, pass) in self.passes.iter().enumerate() {
            let used = pass.reads.iter().map(|r| (r, "reads")).chain(pass.indirect.iter().map(|r| (r, "uses indirect")));
            for (resource, how) in used {
                if resource.is_per_frame() && self.last_writer(*resource, i).is_none() {
                    return Err(SplatError::Layout(format!(
                        "pass '{}' {} {:?} before any pass writes it",
                        pass.kind, how, resource
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn indirect_edges(&self) -> Vec<IndirectEdge> {
        let mut edges = Vec::new();
        for (i, pass) in self.passes.iter().enumerate() {
            for &resource in &pass.indirect {
                if let Some(w) = self.last_writer(resource, i) {
                    edges.push(IndirectEdge {
                        producer: self.passes[w].kind,
                        consumer: pass.kind,
                        resource,
                    });
                }
            }
        }
        edges
    }
}
