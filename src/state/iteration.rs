use std::fmt;

use serde::{Deserialize, Serialize};

/// 循环迭代路径，嵌套循环时逐层追加迭代序号
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IterationPath(Vec<u32>);

impl IterationPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, iteration: u32) -> Self {
        let mut indices = self.0.clone();
        indices.push(iteration);
        Self(indices)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    /// `prefix` 是否为自身或外层路径
    pub fn starts_with(&self, prefix: &IterationPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// 当前迭代最内层的序号
    pub fn current(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// 自身及所有外层路径，由内向外
    pub fn ancestors(&self) -> impl Iterator<Item = IterationPath> + '_ {
        (0..=self.0.len())
            .rev()
            .map(move |len| IterationPath(self.0[..len].to_vec()))
    }
}

impl fmt::Display for IterationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("-");
        }
        let joined = self
            .0
            .iter()
            .map(|index| index.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&joined)
    }
}

/// 结果键：节点 id 加迭代路径
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    pub node: String,
    #[serde(default, skip_serializing_if = "IterationPath::is_root")]
    pub iteration: IterationPath,
}

impl ResultKey {
    pub fn new(node: impl Into<String>, iteration: IterationPath) -> Self {
        Self {
            node: node.into(),
            iteration,
        }
    }

    pub fn root(node: impl Into<String>) -> Self {
        Self::new(node, IterationPath::root())
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.iteration.is_root() {
            f.write_str(&self.node)
        } else {
            write!(f, "{}#{}", self.node, self.iteration)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestors_walk_outwards() {
        let path = IterationPath::root().child(2).child(0);
        let walked: Vec<String> = path.ancestors().map(|p| p.to_string()).collect();
        assert_eq!(walked, vec!["2.0", "2", "-"]);
        assert_eq!(path.current(), Some(0));
    }

    #[test]
    fn prefix_matches_whole_indices() {
        let outer = IterationPath::root().child(1);
        assert!(outer.child(0).starts_with(&outer));
        assert!(outer.starts_with(&IterationPath::root()));
        assert!(!IterationPath::root().child(0).child(1).starts_with(&outer));
    }

    #[test]
    fn result_keys_render_iterations() {
        assert_eq!(ResultKey::root("tool").to_string(), "tool");
        let key = ResultKey::new("tool", IterationPath::root().child(3));
        assert_eq!(key.to_string(), "tool#3");
    }
}
