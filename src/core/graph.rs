//! Render graph: owns nodes and the links between their clips.
//!
//! A link always goes from the `Output` clip of a producer to one source
//! clip of a consumer. Both ends are recorded (the source clip keeps its
//! upstream, the output clip lists its consumers) and kept in sync by the
//! graph, so nodes never hold references to each other.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use log::{debug, trace};
use uuid::Uuid;

use crate::core::event_bus::NodeEventEmitter;
use crate::entities::buffer_node::InputBufferNode;
use crate::entities::clip::{ClipDirection, ClipId};
use crate::entities::effect_node::ImageEffectNode;
use crate::entities::node::Node;
use crate::entities::node_kind::NodeKind;
use crate::entities::plugin::ImageEffect;
use crate::entities::project::ProjectSettings;
use crate::error::{HostError, HostResult};

/// DFS marks for ordering.
#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: IndexMap<Uuid, NodeKind>,
    emitter: NodeEventEmitter,
    project: ProjectSettings,
    /// Nodes whose links changed since the last `take_stale`
    stale: HashSet<Uuid>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph whose nodes report parameter changes through `emitter`.
    pub fn with_emitter(emitter: NodeEventEmitter) -> Self {
        Self {
            emitter,
            ..Self::default()
        }
    }

    pub fn project(&self) -> &ProjectSettings {
        &self.project
    }

    /// Replace the project settings of the graph and of every effect in it.
    pub fn set_project(&mut self, project: ProjectSettings) {
        for node in self.nodes.values_mut() {
            if let Some(effect) = node.as_effect_mut() {
                effect.set_project(project.clone());
            }
        }
        self.project = project;
    }

    /// Insert a node, renaming it if its name is taken. Returns its uuid.
    pub fn add_node(&mut self, node: impl Into<NodeKind>) -> Uuid {
        let mut node = node.into();
        if self.node_by_name(node.name()).is_some() {
            let unique = self.gen_name(node.name());
            debug!("Graph: name `{}` taken, using `{}`", node.name(), unique);
            node.set_name(&unique);
        }
        if let Some(effect) = node.as_effect_mut() {
            effect.set_project(self.project.clone());
        }
        node.attach(self.emitter.clone());

        let uuid = node.uuid();
        trace!("Graph: added {} `{}` ({})", node.node_type(), node.name(), uuid);
        self.nodes.insert(uuid, node);
        uuid
    }

    /// Instantiate `effect` and insert it.
    pub fn add_effect(&mut self, effect: Box<dyn ImageEffect>) -> HostResult<Uuid> {
        let node = ImageEffectNode::new(effect)?;
        Ok(self.add_node(node))
    }

    /// Insert an empty buffer-input node named `name`.
    pub fn add_buffer(&mut self, name: &str) -> Uuid {
        self.add_node(InputBufferNode::new(name))
    }

    /// Generate a free name: strips a trailing `_N` and returns `base_M`
    /// with M above every number already used for that base.
    fn gen_name(&self, name: &str) -> String {
        let base = match name.rsplit_once('_') {
            Some((b, n)) if !b.is_empty() && n.parse::<u32>().is_ok() => b,
            _ => name,
        };
        let mut max_num = 0u32;
        for node in self.nodes.values() {
            if let Some(suffix) = node.name().strip_prefix(base).and_then(|s| s.strip_prefix('_'))
                && let Ok(n) = suffix.parse::<u32>()
            {
                max_num = max_num.max(n);
            }
        }
        format!("{}_{}", base, max_num + 1)
    }

    /// Remove a node and every link touching it.
    pub fn remove_node(&mut self, uuid: Uuid) -> HostResult<NodeKind> {
        let mut node = self
            .nodes
            .shift_remove(&uuid)
            .ok_or_else(|| HostError::not_found(format!("node {}", uuid)))?;

        // Consumers lose their input
        for other in self.nodes.values_mut() {
            let linked: Vec<String> = other
                .inputs()
                .into_iter()
                .filter(|(_, up)| up.as_ref().is_some_and(|u| u.node == uuid))
                .map(|(clip, _)| clip)
                .collect();
            if !linked.is_empty() {
                self.stale.insert(other.uuid());
            }
            for clip in linked {
                other.disconnect_input(&clip)?;
            }
        }
        self.stale.insert(uuid);

        // Producers forget this consumer
        for (clip, up) in node.inputs() {
            if let Some(up) = up {
                if let Some(producer) = self.nodes.get_mut(&up.node) {
                    producer.output_clip_mut().remove_downstream(&ClipId::new(uuid, clip.as_str()));
                }
                node.disconnect_input(&clip)?;
            }
        }

        debug!("Graph: removed `{}` ({})", node.name(), uuid);
        Ok(node)
    }

    // === Lookup ===

    pub fn node(&self, uuid: Uuid) -> HostResult<&NodeKind> {
        self.nodes
            .get(&uuid)
            .ok_or_else(|| HostError::not_found(format!("node {}", uuid)))
    }

    pub fn node_mut(&mut self, uuid: Uuid) -> HostResult<&mut NodeKind> {
        self.nodes
            .get_mut(&uuid)
            .ok_or_else(|| HostError::not_found(format!("node {}", uuid)))
    }

    pub fn node_by_name(&self, name: &str) -> Option<&NodeKind> {
        self.nodes.values().find(|n| n.name() == name)
    }

    pub fn uuid_of(&self, name: &str) -> HostResult<Uuid> {
        self.node_by_name(name)
            .map(|n| n.uuid())
            .ok_or_else(|| HostError::not_found(format!("node `{}`", name)))
    }

    /// Typed access; TypeMismatch if the node is not an effect.
    pub fn effect(&self, uuid: Uuid) -> HostResult<&ImageEffectNode> {
        self.node(uuid)?.effect()
    }

    pub fn effect_mut(&mut self, uuid: Uuid) -> HostResult<&mut ImageEffectNode> {
        self.node_mut(uuid)?.effect_mut()
    }

    pub fn buffer_mut(&mut self, uuid: Uuid) -> HostResult<&mut InputBufferNode> {
        self.node_mut(uuid)?.buffer_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeKind> {
        self.nodes.values()
    }

    /// Uuids of the nodes feeding `uuid`, in clip order.
    pub fn upstream(&self, uuid: Uuid) -> HostResult<Vec<Uuid>> {
        Ok(self
            .node(uuid)?
            .inputs()
            .into_iter()
            .filter_map(|(_, up)| up.map(|u| u.node))
            .collect())
    }

    // === Links ===

    /// Link `from` into the single input clip of `to`.
    pub fn connect(&mut self, from: Uuid, to: Uuid) -> HostResult<()> {
        let clip = self.node(to)?.single_input_clip()?.name().to_string();
        self.connect_clip(from, to, &clip)
    }

    /// Link the output of `from` into source clip `clip` of `to`,
    /// replacing any previous link of that clip.
    pub fn connect_clip(&mut self, from: Uuid, to: Uuid, clip: &str) -> HostResult<()> {
        self.node(from)?;
        let target = self.node(to)?;
        if target.clip(clip)?.direction() != ClipDirection::Source {
            return Err(HostError::connection(format!(
                "`{}` on node `{}` is not a source clip",
                clip,
                target.name()
            )));
        }
        if self.reaches(from, to) {
            return Err(HostError::connection(format!(
                "linking `{}` into `{}` would create a cycle",
                self.node(from)?.name(),
                target.name()
            )));
        }

        let consumer = ClipId::new(to, clip);
        if let Some(old) = self.node_mut(to)?.disconnect_input(clip)?
            && let Some(producer) = self.nodes.get_mut(&old.node)
        {
            producer.output_clip_mut().remove_downstream(&consumer);
        }
        self.node_mut(to)?.connect_input(clip, ClipId::output_of(from))?;
        self.node_mut(from)?.output_clip_mut().add_downstream(consumer);
        self.stale.insert(to);
        trace!("Graph: linked {} -> {}.{}", from, to, clip);
        Ok(())
    }

    /// Unlink source clip `clip` of `to`. Returns the former upstream.
    pub fn disconnect(&mut self, to: Uuid, clip: &str) -> HostResult<Option<ClipId>> {
        let old = self.node_mut(to)?.disconnect_input(clip)?;
        if let Some(up) = &old
            && let Some(producer) = self.nodes.get_mut(&up.node)
        {
            producer.output_clip_mut().remove_downstream(&ClipId::new(to, clip));
        }
        if old.is_some() {
            self.stale.insert(to);
        }
        Ok(old)
    }

    /// Drain the nodes whose rendered output may no longer match their
    /// inputs: relinked, removed, or reporting changes themselves.
    pub(crate) fn take_stale(&mut self) -> Vec<Uuid> {
        let mut stale: Vec<Uuid> = self.stale.drain().collect();
        for node in self.nodes.values_mut() {
            if node.take_stale() && !stale.contains(&node.uuid()) {
                stale.push(node.uuid());
            }
        }
        stale
    }

    /// Is `target` upstream of (or equal to) `start`?
    fn reaches(&self, start: Uuid, target: Uuid) -> bool {
        let mut stack = vec![start];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.inputs().into_iter().filter_map(|(_, up)| up.map(|u| u.node)));
            }
        }
        false
    }

    // === Ordering ===

    /// Every node, producers before consumers.
    pub fn topological_order(&self) -> HostResult<Vec<Uuid>> {
        let roots: Vec<Uuid> = self.nodes.keys().copied().collect();
        self.subgraph_order(&roots)
    }

    /// `outputs` and everything feeding them, producers before consumers.
    pub fn subgraph_order(&self, outputs: &[Uuid]) -> HostResult<Vec<Uuid>> {
        let mut marks: HashMap<Uuid, Mark> = HashMap::new();
        let mut order = Vec::new();
        for &root in outputs {
            self.node(root)?;
            self.visit(root, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    fn visit(&self, uuid: Uuid, marks: &mut HashMap<Uuid, Mark>, order: &mut Vec<Uuid>) -> HostResult<()> {
        match marks.get(&uuid) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(HostError::connection(format!("cycle through node {}", uuid)));
            }
            None => {}
        }
        marks.insert(uuid, Mark::Visiting);
        let node = self.node(uuid)?;
        for (clip, up) in node.inputs() {
            let Some(up) = up else { continue };
            if !self.nodes.contains_key(&up.node) {
                return Err(HostError::connection(format!(
                    "clip `{}` of `{}` links to missing node {}",
                    clip,
                    node.name(),
                    up.node
                )));
            }
            self.visit(up.node, marks, order)?;
        }
        marks.insert(uuid, Mark::Done);
        order.push(uuid);
        Ok(())
    }

    /// Insert an unlinked copy of `uuid` under a fresh identity.
    pub fn duplicate_node(&mut self, uuid: Uuid) -> HostResult<Uuid> {
        let mut copy = self.node(uuid)?.clone();
        copy.rekey(Uuid::new_v4());
        Ok(self.add_node(copy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::EventBus;
    use crate::entities::params::{ChangeReason, ParamChangedEvent};
    use crate::test_support::{ClipsEffect, ConstantEffect, InvertEffect};

    #[test]
    fn names_are_made_unique() {
        let mut graph = Graph::new();
        let a = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        let b = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        let c = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        assert_eq!(graph.node(a).unwrap().name(), "Constant");
        assert_eq!(graph.node(b).unwrap().name(), "Constant_1");
        assert_eq!(graph.node(c).unwrap().name(), "Constant_2");
        assert_eq!(graph.uuid_of("Constant_1").unwrap(), b);
        assert!(matches!(graph.uuid_of("nope"), Err(HostError::NotFound(_))));
    }

    #[test]
    fn connect_keeps_both_ends_in_sync() {
        let mut graph = Graph::new();
        let src = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        let other = graph.add_effect(Box::new(ConstantEffect::new(2.0))).unwrap();
        let inv = graph.add_effect(Box::new(InvertEffect)).unwrap();

        graph.connect(src, inv).unwrap();
        assert_eq!(graph.upstream(inv).unwrap(), vec![src]);
        assert_eq!(graph.node(src).unwrap().output_clip().downstream(), &[ClipId::new(inv, "Source")]);

        // Relinking replaces the old producer
        graph.connect_clip(other, inv, "Source").unwrap();
        assert_eq!(graph.upstream(inv).unwrap(), vec![other]);
        assert!(graph.node(src).unwrap().output_clip().downstream().is_empty());

        assert_eq!(graph.disconnect(inv, "Source").unwrap(), Some(ClipId::output_of(other)));
        assert!(graph.node(other).unwrap().output_clip().downstream().is_empty());
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = Graph::new();
        let a = graph.add_effect(Box::new(InvertEffect)).unwrap();
        let b = graph.add_effect(Box::new(InvertEffect)).unwrap();
        graph.connect(a, b).unwrap();
        assert!(matches!(graph.connect(b, a), Err(HostError::Connection(_))));
        assert!(matches!(graph.connect(a, a), Err(HostError::Connection(_))));
    }

    #[test]
    fn output_clip_cannot_be_a_target() {
        let mut graph = Graph::new();
        let a = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        let b = graph.add_effect(Box::new(InvertEffect)).unwrap();
        assert!(matches!(graph.connect_clip(a, b, "Output"), Err(HostError::Connection(_))));
        assert!(matches!(graph.connect_clip(a, b, "Matte"), Err(HostError::NotFound(_))));
        let buf = graph.add_buffer("plate");
        assert!(matches!(graph.connect(a, buf), Err(HostError::Unsupported { .. })));
    }

    #[test]
    fn order_puts_producers_first() {
        let mut graph = Graph::new();
        let merge = graph.add_effect(Box::new(ClipsEffect::new(&["A", "B"]))).unwrap();
        let inv = graph.add_effect(Box::new(InvertEffect)).unwrap();
        let plate = graph.add_buffer("plate");
        let unrelated = graph.add_effect(Box::new(ConstantEffect::new(0.0))).unwrap();
        graph.connect(plate, inv).unwrap();
        graph.connect_clip(inv, merge, "A").unwrap();
        graph.connect_clip(plate, merge, "B").unwrap();

        let order = graph.subgraph_order(&[merge]).unwrap();
        assert_eq!(order, vec![plate, inv, merge]);

        let all = graph.topological_order().unwrap();
        assert_eq!(all.len(), 4);
        let pos = |u: Uuid| all.iter().position(|&x| x == u).unwrap();
        assert!(pos(plate) < pos(inv) && pos(inv) < pos(merge));
        assert!(all.contains(&unrelated));
    }

    #[test]
    fn remove_node_drops_links() {
        let mut graph = Graph::new();
        let plate = graph.add_buffer("plate");
        let inv = graph.add_effect(Box::new(InvertEffect)).unwrap();
        let inv2 = graph.add_effect(Box::new(InvertEffect)).unwrap();
        graph.connect(plate, inv).unwrap();
        graph.connect(inv, inv2).unwrap();

        let removed = graph.remove_node(inv).unwrap();
        assert_eq!(removed.uuid(), inv);
        assert!(removed.inputs().iter().all(|(_, up)| up.is_none()));
        assert!(graph.upstream(inv2).unwrap().is_empty());
        assert!(graph.node(plate).unwrap().output_clip().downstream().is_empty());
        assert!(graph.remove_node(inv).is_err());
    }

    #[test]
    fn link_edits_and_node_changes_are_reported_stale() {
        let mut graph = Graph::new();
        let src = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        let inv = graph.add_effect(Box::new(InvertEffect)).unwrap();
        let out = graph.add_effect(Box::new(InvertEffect)).unwrap();
        graph.take_stale();

        graph.connect(src, inv).unwrap();
        graph.connect(inv, out).unwrap();
        let mut stale = graph.take_stale();
        stale.sort();
        let mut expected = vec![inv, out];
        expected.sort();
        assert_eq!(stale, expected);
        assert!(graph.take_stale().is_empty());

        graph.set_project(ProjectSettings::with_size(8.0, 8.0));
        assert_eq!(graph.take_stale().len(), 3);

        graph.remove_node(inv).unwrap();
        let stale = graph.take_stale();
        assert!(stale.contains(&inv) && stale.contains(&out));
        assert!(!stale.contains(&src));

        assert_eq!(graph.disconnect(out, "Source").unwrap(), None);
        assert!(graph.take_stale().is_empty());
    }

    #[test]
    fn typed_access() {
        let mut graph = Graph::new();
        let plate = graph.add_buffer("plate");
        let fx = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        assert!(graph.effect(fx).is_ok());
        assert!(matches!(graph.effect(plate), Err(HostError::TypeMismatch { .. })));
        assert!(graph.buffer_mut(plate).is_ok());
        assert!(graph.buffer_mut(fx).is_err());
    }

    #[test]
    fn duplicate_is_unlinked_and_renamed() {
        let mut graph = Graph::new();
        let src = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        let inv = graph.add_effect(Box::new(InvertEffect)).unwrap();
        graph.connect(src, inv).unwrap();

        let copy = graph.duplicate_node(inv).unwrap();
        assert_ne!(copy, inv);
        assert_eq!(graph.node(copy).unwrap().name(), "Invert_1");
        assert!(graph.upstream(copy).unwrap().is_empty());
        assert_eq!(graph.upstream(inv).unwrap(), vec![src]);
    }

    #[test]
    fn project_reaches_every_effect() {
        let mut graph = Graph::new();
        let fx = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        graph.set_project(ProjectSettings::with_size(64.0, 32.0));
        assert_eq!(graph.effect(fx).unwrap().project_size().x, 64.0);
        let late = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        assert_eq!(graph.effect(late).unwrap().project_size().y, 32.0);
    }

    #[test]
    fn attached_params_report_changes() {
        let bus = EventBus::new();
        let mut graph = Graph::with_emitter(NodeEventEmitter::from_emitter(bus.emitter()));
        let fx = graph.add_effect(Box::new(ConstantEffect::new(1.0))).unwrap();
        graph
            .effect_mut(fx)
            .unwrap()
            .param_set_mut()
            .unwrap()
            .get_mut("value")
            .unwrap()
            .as_double_mut()
            .unwrap()
            .set(0.5, ChangeReason::UserEdited);

        let events = bus.take::<ParamChangedEvent>();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node, fx);
        assert_eq!(events[0].param, "value");
    }
}
