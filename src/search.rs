use std::collections::BTreeMap;

use log::{debug, trace};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::eval::{self, Answer, Output};
use crate::index::{add_empty_options, relate_filter_options, FilterIndex, RelateFilterConfig};
use crate::program::{NodeKind, ProgramNode};
use crate::scene::{FilterKey, Relation, Scene};
use crate::template::{
    CompositeKind, Constraint, ParamType, PrimitiveOp, SlotValue, Template, TemplateNodeKind,
};

/// Rejection-sampling bounds on the per-answer counts. The defaults are the
/// empirically tuned values; change them only with a reason.
#[derive(Debug, Clone, Copy)]
pub struct RejectionThresholds {
    pub second_largest_ratio: f64,
    pub median_ratio: f64,
    pub median_floor: usize,
}

impl Default for RejectionThresholds {
    fn default() -> Self {
        Self {
            second_largest_ratio: 1.1,
            median_ratio: 5.0,
            median_floor: 5,
        }
    }
}

/// Running per-answer counts for one template, shared across scenes until
/// the driver resets them.
pub type AnswerCounts = BTreeMap<Answer, usize>;

pub fn answer_counts_for(template: &Template) -> AnswerCounts {
    template.answer_domain().into_iter().map(|a| (a, 0)).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    /// Stop after this many accepted instantiations.
    pub max_instances: usize,
    pub thresholds: RejectionThresholds,
    /// Trivial fraction for relational filter options.
    pub trivial_frac: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_instances: 1,
            thresholds: RejectionThresholds::default(),
            trivial_frac: 0.1,
        }
    }
}

/// One partial expansion of a template: the concrete nodes built so far, the
/// parameter bindings, the template-node → concrete-node map, and the next
/// template node to expand. States are self-contained values; the stack owns
/// them and abandoning the stack abandons the branch.
#[derive(Debug, Clone)]
struct SearchState {
    nodes: Vec<ProgramNode>,
    vals: BTreeMap<String, SlotValue>,
    input_map: Vec<Option<usize>>,
    next_template_node: usize,
}

/// A fully expanded, accepted question program.
#[derive(Debug, Clone, PartialEq)]
pub struct Instantiation {
    pub nodes: Vec<ProgramNode>,
    pub vals: BTreeMap<String, SlotValue>,
    pub answer: Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneReason {
    /// The program evaluates to the invalid marker.
    Invalid,
    /// A template constraint is already violated.
    Constraint,
    /// The answer is overrepresented in the running counts.
    Balance,
    /// The relational phrasing admits more than one valid reading.
    Degenerate,
}

#[derive(Debug, Clone)]
pub enum SearchStep {
    /// A state was expanded; `pushed` successors entered the stack.
    Expanded { pushed: usize },
    /// A state was discarded.
    Pruned(PruneReason),
    /// A complete state passed every check.
    Accepted(Instantiation),
}

/// Depth-first expansion of one template over one scene.
///
/// The search pops partial states off an explicit stack, validates each
/// against the evaluator and the template constraints, and either expands
/// the next template node (pushing one successor per candidate choice, in
/// shuffled order) or accepts the completed program subject to the
/// answer-balance rejection tests. `step` drives one pop at a time so the
/// caller can stop as soon as it has enough accepted instantiations.
pub struct TemplateDfs<'a, R: Rng> {
    scene: &'a Scene,
    index: &'a FilterIndex,
    template: &'a Template,
    cfg: &'a SearchConfig,
    counts: &'a mut AnswerCounts,
    rng: &'a mut R,
    stack: Vec<SearchState>,
    accepted: usize,
}

impl<'a, R: Rng> TemplateDfs<'a, R> {
    pub fn new(
        scene: &'a Scene,
        index: &'a FilterIndex,
        template: &'a Template,
        cfg: &'a SearchConfig,
        counts: &'a mut AnswerCounts,
        rng: &'a mut R,
    ) -> Self {
        // NOTE: templates are validated at load time; a first node that is
        // not a plain source node here is a bug, not an input error.
        let kind = match template.nodes[0].kind {
            TemplateNodeKind::Primitive(op) => {
                op.plain_kind().expect("first template node must be plain")
            }
            TemplateNodeKind::Composite(_) => panic!("first template node must be plain"),
        };
        let mut input_map = vec![None; template.nodes.len()];
        input_map[0] = Some(0);
        let initial = SearchState {
            nodes: vec![ProgramNode::new(kind, vec![])],
            vals: BTreeMap::new(),
            input_map,
            next_template_node: 1,
        };
        Self {
            scene,
            index,
            template,
            cfg,
            counts,
            rng,
            stack: vec![initial],
            accepted: 0,
        }
    }

    /// Process one state off the stack. Returns `None` once the stack is
    /// exhausted or the acceptance cap is reached.
    pub fn step(&mut self) -> Option<SearchStep> {
        if self.accepted >= self.cfg.max_instances {
            return None;
        }
        let state = self.stack.pop()?;

        let outputs = eval::evaluate(&state.nodes, self.scene);
        if outputs.last().map_or(true, Output::is_invalid) {
            trace!("prune: invalid result at node {}", state.nodes.len() - 1);
            return Some(SearchStep::Pruned(PruneReason::Invalid));
        }

        if let Some(constraint) = self.violated_constraint(&state, &outputs) {
            trace!("prune: constraint {constraint:?}");
            return Some(SearchStep::Pruned(PruneReason::Constraint));
        }

        if state.next_template_node == self.template.nodes.len() {
            return Some(self.finish(state, &outputs));
        }

        let pushed = self.expand(state, &outputs);
        Some(SearchStep::Expanded { pushed })
    }

    /// Drive the search to completion and collect the accepted programs.
    pub fn run(mut self) -> Vec<Instantiation> {
        let mut accepted = Vec::new();
        while let Some(step) = self.step() {
            if let SearchStep::Accepted(inst) = step {
                accepted.push(inst);
            }
        }
        accepted
    }

    fn violated_constraint(&self, state: &SearchState, outputs: &[Output]) -> Option<&Constraint> {
        self.template.constraints.iter().find(|c| match c {
            Constraint::Neq(a, b) => match (state.vals.get(a), state.vals.get(b)) {
                (Some(x), Some(y)) => x != y,
                _ => false,
            },
            Constraint::Null(p) => state.vals.get(p).map_or(false, |v| !v.is_null()),
            Constraint::OutNeq(i, j) => match (state.input_map[*i], state.input_map[*j]) {
                (Some(a), Some(b)) => outputs[a] == outputs[b],
                _ => false,
            },
        })
    }

    /// Rejection sampling and final acceptance of a complete state.
    fn finish(&mut self, state: SearchState, outputs: &[Output]) -> SearchStep {
        let last = outputs.last().expect("states always carry at least one node");
        let answer = match last.as_answer() {
            Some(a) => a,
            // validated templates end in a scalar-producing node
            None => return SearchStep::Pruned(PruneReason::Invalid),
        };

        let cur = self.counts.get(&answer).copied().unwrap_or(0);
        let mut sorted: Vec<usize> = self.counts.values().copied().collect();
        sorted.sort_unstable();
        if sorted.len() >= 2 {
            let second_largest = sorted[sorted.len() - 2];
            if cur as f64 > self.cfg.thresholds.second_largest_ratio * second_largest as f64 {
                debug!("prune: answer {} over second-largest bound", answer.as_display());
                return SearchStep::Pruned(PruneReason::Balance);
            }
        }
        let median = sorted[sorted.len() / 2].max(self.cfg.thresholds.median_floor);
        if cur as f64 > self.cfg.thresholds.median_ratio * median as f64 {
            debug!("prune: answer {} over median bound", answer.as_display());
            return SearchStep::Pruned(PruneReason::Balance);
        }

        if self.template.has_bare_relate() && eval::is_degenerate(&state.nodes, self.scene, last) {
            debug!("prune: degenerate relational question");
            return SearchStep::Pruned(PruneReason::Degenerate);
        }

        *self.counts.entry(answer).or_insert(0) += 1;
        self.accepted += 1;
        SearchStep::Accepted(Instantiation {
            nodes: state.nodes,
            vals: state.vals,
            answer,
        })
    }

    fn expand(&mut self, state: SearchState, outputs: &[Output]) -> usize {
        let tnode = &self.template.nodes[state.next_template_node];
        match tnode.kind {
            TemplateNodeKind::Composite(kind) => self.expand_composite(state, outputs, kind),
            TemplateNodeKind::Primitive(op) => match op.param_type() {
                Some(ty) => self.expand_parametrized(state, op, ty),
                None => self.expand_plain(state, op),
            },
        }
    }

    fn expand_plain(&mut self, state: SearchState, op: PrimitiveOp) -> usize {
        let tmpl_idx = state.next_template_node;
        let tnode = &self.template.nodes[tmpl_idx];
        let mut input_map = state.input_map.clone();
        input_map[tmpl_idx] = Some(state.nodes.len());
        let inputs = remap(&tnode.inputs, &input_map);
        let mut nodes = state.nodes;
        nodes.push(ProgramNode::new(op.plain_kind().expect("plain op"), inputs));
        self.stack.push(SearchState {
            nodes,
            vals: state.vals,
            input_map,
            next_template_node: tmpl_idx + 1,
        });
        1
    }

    fn expand_parametrized(&mut self, state: SearchState, op: PrimitiveOp, ty: ParamType) -> usize {
        let tmpl_idx = state.next_template_node;
        let tnode = &self.template.nodes[tmpl_idx];
        let param_name = tnode.side_inputs[0].clone();
        let mut domain = SlotValue::domain(ty);
        domain.shuffle(&mut *self.rng);
        let pushed = domain.len();
        for val in domain {
            let kind = op.with_value(&val).expect("domain value matches op type");
            let mut input_map = state.input_map.clone();
            input_map[tmpl_idx] = Some(state.nodes.len());
            let inputs = remap(&tnode.inputs, &input_map);
            let mut nodes = state.nodes.clone();
            nodes.push(ProgramNode::new(kind, inputs));
            let mut vals = state.vals.clone();
            vals.insert(param_name.clone(), val);
            self.stack.push(SearchState {
                nodes,
                vals,
                input_map,
                next_template_node: tmpl_idx + 1,
            });
        }
        pushed
    }

    fn expand_composite(
        &mut self,
        state: SearchState,
        outputs: &[Output],
        kind: CompositeKind,
    ) -> usize {
        let last = outputs.last().expect("states always carry at least one node");

        if kind.is_relate() {
            let Some(anchor) = last.as_object() else {
                trace!("prune: relate expansion without an anchor object");
                return 0;
            };
            let rel_cfg = RelateFilterConfig {
                require_unique: kind == CompositeKind::RelateFilterUnique,
                include_empty: matches!(
                    kind,
                    CompositeKind::RelateFilterCount | CompositeKind::RelateFilterExist
                ),
                trivial_frac: self.cfg.trivial_frac,
            };
            let mut options =
                relate_filter_options(self.scene, self.index, anchor, &rel_cfg, &mut *self.rng);
            options.shuffle(&mut *self.rng);
            let pushed = options.len();
            for ((relation, key), _) in options {
                self.push_filter_chain(&state, kind, Some(relation), &key);
            }
            pushed
        } else {
            let Some(candidates) = last.as_object_set() else {
                trace!("prune: filter expansion without a candidate set");
                return 0;
            };
            let mut options = self.index.options_within(candidates);
            if kind == CompositeKind::Filter {
                options.remove(&FilterKey::default());
            }
            if kind == CompositeKind::FilterUnique {
                options.retain(|_, ids| ids.len() == 1);
            } else {
                let num_to_add = match kind {
                    // as many misses as hits
                    CompositeKind::FilterExist => options.len(),
                    // as many misses as singleton hits
                    _ => options.values().filter(|ids| ids.len() == 1).count(),
                };
                add_empty_options(&mut options, num_to_add, &mut *self.rng);
            }
            let mut keys: Vec<FilterKey> = options.keys().copied().collect();
            keys.shuffle(&mut *self.rng);
            let pushed = keys.len();
            for key in keys {
                self.push_filter_chain(&state, kind, None, &key);
            }
            pushed
        }
    }

    /// Materialize one composite choice: an optional relate node, one filter
    /// node per constrained attribute slot, and the trailing
    /// unique/count/exist node the composite kind calls for.
    fn push_filter_chain(
        &mut self,
        state: &SearchState,
        kind: CompositeKind,
        relation: Option<Relation>,
        key: &FilterKey,
    ) {
        let tmpl_idx = state.next_template_node;
        let tnode = &self.template.nodes[tmpl_idx];
        let base = state.nodes.len();
        let mut new_nodes: Vec<ProgramNode> = Vec::new();
        let mut vals = state.vals.clone();
        let mut next_input = state.input_map[tnode.inputs[0]]
            .expect("composite input must be materialized");
        let mut side_names = tnode.side_inputs.as_slice();

        if let Some(rel) = relation {
            let rel_param = &side_names[0];
            side_names = &side_names[1..];
            new_nodes.push(ProgramNode::new(NodeKind::Relate(rel), vec![next_input]));
            vals.insert(rel_param.clone(), SlotValue::Relation(rel));
            next_input = base + new_nodes.len() - 1;
        }

        let slots: [(Option<NodeKind>, SlotValue); 4] = [
            match key.size {
                Some(v) => (Some(NodeKind::FilterSize(v)), SlotValue::Size(v)),
                None => (None, SlotValue::Null(ParamType::Size)),
            },
            match key.color {
                Some(v) => (Some(NodeKind::FilterColor(v)), SlotValue::Color(v)),
                None => (None, SlotValue::Null(ParamType::Color)),
            },
            match key.material {
                Some(v) => (Some(NodeKind::FilterMaterial(v)), SlotValue::Material(v)),
                None => (None, SlotValue::Null(ParamType::Material)),
            },
            match key.shape {
                Some(v) => (Some(NodeKind::FilterShape(v)), SlotValue::Shape(v)),
                None => (None, SlotValue::Null(ParamType::Shape)),
            },
        ];
        for (name, (node_kind, binding)) in side_names.iter().zip(slots) {
            vals.insert(name.clone(), binding);
            if let Some(k) = node_kind {
                new_nodes.push(ProgramNode::new(k, vec![next_input]));
                next_input = base + new_nodes.len() - 1;
            }
        }

        if let Some(extra) = kind.trailing() {
            new_nodes.push(ProgramNode::new(extra, vec![next_input]));
        }

        let mut input_map = state.input_map.clone();
        input_map[tmpl_idx] = Some(base + new_nodes.len() - 1);
        let mut nodes = state.nodes.clone();
        nodes.extend(new_nodes);
        self.stack.push(SearchState {
            nodes,
            vals,
            input_map,
            next_template_node: tmpl_idx + 1,
        });
    }
}

fn remap(template_inputs: &[usize], input_map: &[Option<usize>]) -> Vec<usize> {
    template_inputs
        .iter()
        .map(|&i| input_map[i].expect("input references an unmaterialized node"))
        .collect()
}
