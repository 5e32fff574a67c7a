use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{FlowError, GraphError, Result};
use crate::flow::nodes::{Edge, FlowNode, NodeKind, END_NODE_ID, START_NODE_ID};
use crate::flow::path::ValueRef;

/// 已校验的流程画布，构建后不可变，可在多个运行间共享
#[derive(Clone, Debug)]
pub struct FlowCanvas {
    root: String,
    nodes: BTreeMap<String, FlowNode>,
}

impl FlowCanvas {
    /// 由用户节点构建画布，开始与结束节点由画布自行持有
    pub fn new<I>(root: impl Into<String>, nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = FlowNode>,
    {
        let root = root.into();
        let mut registry = BTreeMap::new();
        for node in nodes {
            if node.is_reserved() {
                return Err(GraphError::ReservedId(node.id).into());
            }
            if registry.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id).into());
            }
            registry.insert(node.id.clone(), node);
        }

        if root.is_empty() || !registry.contains_key(&root) {
            return Err(GraphError::MissingRoot.into());
        }

        registry.insert(
            START_NODE_ID.to_string(),
            FlowNode::new(START_NODE_ID, NodeKind::Start).with_edge(Edge::to(root.clone())),
        );
        registry.insert(
            END_NODE_ID.to_string(),
            FlowNode::new(END_NODE_ID, NodeKind::End),
        );

        validate(&registry)?;
        Ok(Self {
            root,
            nodes: registry,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get_node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.get(id)
    }

    pub fn node(&self, id: &str) -> Result<&FlowNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| FlowError::UnknownNode(id.to_string()))
    }

    pub fn start(&self) -> Result<&FlowNode> {
        self.node(START_NODE_ID)
    }

    /// 全部节点，包括开始与结束节点
    pub fn nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values()
    }

    /// 用户声明的节点
    pub fn user_nodes(&self) -> impl Iterator<Item = &FlowNode> {
        self.nodes.values().filter(|node| !node.is_reserved())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn validate(nodes: &BTreeMap<String, FlowNode>) -> std::result::Result<(), GraphError> {
    for node in nodes.values() {
        validate_edges(node)?;

        for target in node.successors() {
            if !nodes.contains_key(target) {
                return Err(GraphError::DanglingEdge {
                    from: node.id.clone(),
                    to: target.to_string(),
                });
            }
        }

        match &node.kind {
            NodeKind::Parallel(parallel) => {
                if parallel.branches.is_empty() {
                    return Err(GraphError::EmptyParallel(node.id.clone()));
                }
                let mut seen = Vec::with_capacity(parallel.branches.len());
                for branch in &parallel.branches {
                    if seen.contains(&branch.key.as_str()) {
                        return Err(GraphError::DuplicateBranchKey {
                            node: node.id.clone(),
                            key: branch.key.clone(),
                        });
                    }
                    seen.push(branch.key.as_str());
                }
            }
            NodeKind::Loop(loop_node) => {
                if loop_node.max_iterations == 0 {
                    return Err(GraphError::InvalidLoopBound(node.id.clone()));
                }
                if let Some(key) = loop_node.condition.as_ref().and_then(|c| c.key()) {
                    check_reference(&node.id, key)?;
                }
            }
            _ => {}
        }
    }

    detect_cycles(nodes)?;
    check_scopes(nodes)
}

/// 每个分支与循环体独占自己能到达的节点，不与兄弟分支或宿主的后续路径共享
fn check_scopes(nodes: &BTreeMap<String, FlowNode>) -> std::result::Result<(), GraphError> {
    for owner in nodes.values() {
        let entries: Vec<&str> = match &owner.kind {
            NodeKind::Parallel(parallel) => parallel
                .branches
                .iter()
                .map(|branch| branch.entry.as_str())
                .collect(),
            NodeKind::Loop(loop_node) => vec![loop_node.body.as_str()],
            _ => continue,
        };

        let joins = owner.join_targets();
        let mut claimed = reachable(nodes, &joins, &[]);
        for entry in entries {
            if joins.contains(&entry) {
                return Err(scope_escape(owner, entry));
            }
            for node in reachable(nodes, &[entry], &joins) {
                if !claimed.insert(node) {
                    return Err(scope_escape(owner, node));
                }
            }
        }
    }
    Ok(())
}

fn scope_escape(owner: &FlowNode, node: &str) -> GraphError {
    GraphError::ScopeEscape {
        owner: owner.id.clone(),
        node: node.to_string(),
    }
}

/// 从 `from` 出发可到达的节点，不含结束节点，遇到 `stop` 中的节点不再深入
fn reachable<'a>(
    nodes: &'a BTreeMap<String, FlowNode>,
    from: &[&'a str],
    stop: &[&str],
) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut pending: Vec<&'a str> = from.to_vec();
    while let Some(current) = pending.pop() {
        if current == END_NODE_ID || stop.contains(&current) || !seen.insert(current) {
            continue;
        }
        if let Some(node) = nodes.get(current) {
            pending.extend(node.successors());
        }
    }
    seen
}

fn validate_edges(node: &FlowNode) -> std::result::Result<(), GraphError> {
    let defaults = node.next.iter().filter(|edge| edge.default).count();
    let conditional = node.next.iter().filter(|edge| edge.is_conditional()).count();
    let plain = node
        .next
        .iter()
        .filter(|edge| !edge.default && !edge.is_conditional())
        .count();

    for edge in node.next.iter() {
        if let Some(branch) = &edge.branch {
            if edge.default {
                return Err(GraphError::MultipleDefaultBranches(node.id.clone()));
            }
            check_reference(&node.id, &branch.branch_key)?;
        }
    }

    if conditional > 0 {
        if defaults == 0 {
            return Err(GraphError::MissingDefaultBranch(node.id.clone()));
        }
        if defaults > 1 {
            return Err(GraphError::MultipleDefaultBranches(node.id.clone()));
        }
        if plain > 0 {
            return Err(GraphError::AmbiguousSuccessor(node.id.clone()));
        }
    } else if defaults > 1 {
        return Err(GraphError::MultipleDefaultBranches(node.id.clone()));
    } else if defaults + plain > 1 {
        return Err(GraphError::AmbiguousSuccessor(node.id.clone()));
    }
    Ok(())
}

fn check_reference(node: &str, reference: &str) -> std::result::Result<(), GraphError> {
    ValueRef::parse(reference)
        .map(|_| ())
        .map_err(|_| GraphError::InvalidReference {
            node: node.to_string(),
            reference: reference.to_string(),
        })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn detect_cycles(nodes: &BTreeMap<String, FlowNode>) -> std::result::Result<(), GraphError> {
    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(nodes.len());

    for start in nodes.keys() {
        if marks.contains_key(start.as_str()) {
            continue;
        }
        // 显式栈，避免深图递归
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        marks.insert(start.as_str(), Mark::Visiting);

        while let Some((current, cursor)) = stack.pop() {
            let successors = nodes
                .get(current)
                .map(|node| node.successors())
                .unwrap_or_default();

            if let Some(next) = successors.get(cursor).copied() {
                stack.push((current, cursor + 1));
                match marks.get(next) {
                    Some(Mark::Visiting) => return Err(GraphError::Cycle(next.to_string())),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Visiting);
                        stack.push((next, 0));
                    }
                }
            } else {
                marks.insert(current, Mark::Done);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::nodes::{LoopNode, ParallelBranch, ParallelNode};

    fn noop(id: &str) -> FlowNode {
        FlowNode::new(id, NodeKind::NoOp)
    }

    #[test]
    fn canvas_owns_start_and_end() {
        let canvas = FlowCanvas::new("a", vec![noop("a")]).unwrap();
        assert_eq!(canvas.root(), "a");
        assert_eq!(canvas.len(), 3);
        assert_eq!(canvas.start().unwrap().next, vec![Edge::to("a")]);
        assert!(canvas.get_node(END_NODE_ID).is_some());
        assert_eq!(canvas.user_nodes().count(), 1);
    }

    #[test]
    fn rejects_reserved_and_duplicate_ids() {
        let err = FlowCanvas::new("start", vec![noop("start")]).unwrap_err();
        assert!(matches!(err, FlowError::InvalidGraph(GraphError::ReservedId(_))));

        let err = FlowCanvas::new("a", vec![noop("a"), noop("a")]).unwrap_err();
        assert!(matches!(err, FlowError::InvalidGraph(GraphError::DuplicateNode(_))));
    }

    #[test]
    fn rejects_cycles_through_edges_and_bodies() {
        let err = FlowCanvas::new(
            "a",
            vec![
                noop("a").with_edge(Edge::to("b")),
                noop("b").with_edge(Edge::to("a")),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::InvalidGraph(GraphError::Cycle(_))));

        let err = FlowCanvas::new(
            "loop",
            vec![
                FlowNode::new("loop", NodeKind::Loop(LoopNode::new("body", 3))),
                noop("body").with_edge(Edge::to("loop")),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::InvalidGraph(GraphError::Cycle(_))));
    }

    #[test]
    fn rejects_malformed_parallel_nodes() {
        let err = FlowCanvas::new(
            "fork",
            vec![FlowNode::new(
                "fork",
                NodeKind::Parallel(ParallelNode::new(Vec::new())),
            )],
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::InvalidGraph(GraphError::EmptyParallel(_))));

        let err = FlowCanvas::new(
            "fork",
            vec![
                FlowNode::new(
                    "fork",
                    NodeKind::Parallel(ParallelNode::new(vec![
                        ParallelBranch::new("x", "a"),
                        ParallelBranch::new("x", "a"),
                    ])),
                ),
                noop("a"),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidGraph(GraphError::DuplicateBranchKey { .. })
        ));
    }

    #[test]
    fn branches_may_only_meet_at_the_join() {
        let fork = || {
            FlowNode::new(
                "fork",
                NodeKind::Parallel(ParallelNode::new(vec![
                    ParallelBranch::new("a", "a"),
                    ParallelBranch::new("b", "b"),
                ])),
            )
            .with_edge(Edge::to("merge"))
        };

        let joined = FlowCanvas::new(
            "fork",
            vec![
                fork(),
                noop("a").with_edge(Edge::to("merge")),
                noop("b").with_edge(Edge::to("merge")),
                noop("merge"),
            ],
        );
        assert!(joined.is_ok());

        let shared = FlowCanvas::new(
            "fork",
            vec![
                fork(),
                noop("a").with_edge(Edge::to("shared")),
                noop("b").with_edge(Edge::to("shared")),
                noop("shared"),
                noop("merge"),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            shared,
            FlowError::InvalidGraph(GraphError::ScopeEscape { node, .. }) if node == "shared"
        ));
    }

    #[test]
    fn loop_body_cannot_reach_past_the_join() {
        let err = FlowCanvas::new(
            "loop",
            vec![
                FlowNode::new("loop", NodeKind::Loop(LoopNode::new("body", 2)))
                    .with_edge(Edge::to("after")),
                noop("body").with_edge(Edge::to("tail")),
                noop("after").with_edge(Edge::to("tail")),
                noop("tail"),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidGraph(GraphError::ScopeEscape { owner, node }) if owner == "loop" && node == "tail"
        ));
    }

    #[test]
    fn rejects_unparseable_branch_keys() {
        let err = FlowCanvas::new(
            "a",
            vec![
                noop("a")
                    .with_edge(Edge::when("b", "a..x", true))
                    .with_edge(Edge::otherwise("b")),
                noop("b"),
            ],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidGraph(GraphError::InvalidReference { .. })
        ));
    }
}
