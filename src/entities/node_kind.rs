//! NodeKind - enum wrapper for all node kinds.
//!
//! Graphs store `NodeKind` values; the `Node` trait is forwarded to the
//! wrapped node by `enum_dispatch`, which expands the trait signatures here,
//! so every type they mention must be in scope.

use std::sync::Arc;

use enum_dispatch::enum_dispatch;
use uuid::Uuid;

use super::buffer_node::InputBufferNode;
use super::clip::{Attribute, AttributeMut, ClipId, OutputClip, SourceClip};
use super::effect_node::ImageEffectNode;
use super::image::Image;
use super::node::{Node, NodeType, ProcessContext, ProcessInfos, ProcessOptions};
use super::params::{ParamChangedEvent, ParamSet};
use super::region::{PointD, RectD};
use crate::core::event_bus::NodeEventEmitter;
use crate::error::{HostError, HostResult};

#[enum_dispatch(Node)]
#[derive(Clone, Debug)]
pub enum NodeKind {
    ImageEffect(ImageEffectNode),
    InputBuffer(InputBufferNode),
}

impl NodeKind {
    pub fn is_effect(&self) -> bool {
        matches!(self, NodeKind::ImageEffect(_))
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, NodeKind::InputBuffer(_))
    }

    pub fn as_effect(&self) -> Option<&ImageEffectNode> {
        match self {
            NodeKind::ImageEffect(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_effect_mut(&mut self) -> Option<&mut ImageEffectNode> {
        match self {
            NodeKind::ImageEffect(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&InputBufferNode> {
        match self {
            NodeKind::InputBuffer(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_buffer_mut(&mut self) -> Option<&mut InputBufferNode> {
        match self {
            NodeKind::InputBuffer(n) => Some(n),
            _ => None,
        }
    }

    /// Typed access to an image effect node.
    pub fn effect(&self) -> HostResult<&ImageEffectNode> {
        self.as_effect().ok_or_else(|| self.mismatch("image effect"))
    }

    pub fn effect_mut(&mut self) -> HostResult<&mut ImageEffectNode> {
        let found = self.node_type().name();
        self.as_effect_mut().ok_or(HostError::TypeMismatch {
            expected: "image effect",
            found,
        })
    }

    /// Typed access to an input buffer node.
    pub fn buffer(&self) -> HostResult<&InputBufferNode> {
        self.as_buffer().ok_or_else(|| self.mismatch("input buffer"))
    }

    pub fn buffer_mut(&mut self) -> HostResult<&mut InputBufferNode> {
        let found = self.node_type().name();
        self.as_buffer_mut().ok_or(HostError::TypeMismatch {
            expected: "input buffer",
            found,
        })
    }

    fn mismatch(&self, expected: &'static str) -> HostError {
        HostError::TypeMismatch {
            expected,
            found: self.node_type().name(),
        }
    }
}
