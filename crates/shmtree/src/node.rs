//! The compiled node tree: one runtime descriptor per schema element.
//!
//! Nodes live in an arena indexed by [`NodeId`], pushed in depth-first
//! pre-order during compilation, so iterating the arena in index order is
//! the same walk the offset assignment used. The tree is built once at
//! attach time and never mutated afterwards; every other component holds
//! `NodeId`s into it.
//!
//! Each composite carries a lookup index: its children sorted by name, each
//! with the shortest prefix that distinguishes it from its sorted
//! neighbors. Path resolution scans that index, matching the prefix first
//! and then verifying the full name, so a segment that is merely an
//! ambiguous abbreviation resolves to nothing.

use serde_json::Value;

use crate::error::SchemaError;
use crate::layout::{Class, OffsetPlan};
use crate::schema::{ElementSpec, Kind, Schema, parse_element};

/// Index of a node in its [`NodeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One entry of a composite's name-lookup index.
#[derive(Debug, Clone)]
pub struct LookupEntry {
    /// Shortest prefix distinguishing the child from its sorted neighbors.
    pub prefix: String,
    pub child: NodeId,
}

/// Runtime descriptor for one schema element.
#[derive(Debug)]
pub struct Node {
    /// Original schema key ("" for the root).
    pub name: String,
    pub kind: Kind,
    /// Absolute byte offset of the value; 0 for composites.
    pub data_offset: u32,
    /// Value size in bytes (declared size for strings); 0 for composites.
    pub size: u32,
    /// Absolute byte offset of the 64-bit update-timestamp slot; 0 for
    /// composites, which have no slot of their own.
    pub time_offset: u32,
    /// Index of the subtree semaphore. Composites own one; every primitive
    /// shares its enclosing composite's.
    pub sem: u32,
    pub parent: Option<NodeId>,
    /// Child nodes: name-sorted for units, index order for arrays.
    pub children: Vec<NodeId>,
    /// See [`LookupEntry`]. For arrays the prefix is the index string.
    pub lookup: Vec<LookupEntry>,
    /// Float formatting precision from the schema.
    pub precision: Option<u8>,
    /// Change-detection threshold from the schema (0 = report every change).
    pub hysteresis: i64,
    /// The schema's `defaultValue` (Null for composites).
    pub default: Value,
}

/// The compiled tree plus its offset plan.
#[derive(Debug)]
pub struct NodeTree {
    nodes: Vec<Node>,
    plan: OffsetPlan,
    num_semaphores: u32,
}

impl NodeTree {
    /// Compile a schema into a node tree.
    ///
    /// This is the single depth-first walk: unit children are visited in
    /// sorted name order and array children in index order, which makes
    /// offset assignment deterministic for a given schema.
    pub fn build(schema: &Schema) -> Result<Self, SchemaError> {
        let mut b = Builder {
            nodes: Vec::new(),
            plan: OffsetPlan::new(),
            sem_counter: 0,
        };
        b.build_composite("", "", Kind::Unit, schema.root_map(), None)?;

        let mut plan = b.plan;
        plan.finalize();
        let mut nodes = b.nodes;
        for n in &mut nodes {
            if let Some(class) = Class::of(n.kind) {
                n.data_offset += plan.base(class);
            }
        }

        Ok(Self {
            nodes,
            plan,
            num_semaphores: b.sem_counter,
        })
    }

    /// The root node (always a unit).
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Number of nodes in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true only for a tree with nothing but the root.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// All node ids, in depth-first pre-order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Total payload size `S` in bytes.
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.plan.total_size()
    }

    /// The offset plan the compiler produced.
    #[inline]
    pub fn plan(&self) -> &OffsetPlan {
        &self.plan
    }

    /// Number of subtree semaphores (one per composite).
    #[inline]
    pub fn num_semaphores(&self) -> u32 {
        self.num_semaphores
    }

    /// Resolve a `.`- or `/`-separated path from the root.
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        self.resolve_from(self.root(), path)
    }

    /// Resolve a path relative to `base`.
    ///
    /// Returns `None` for an empty path, an empty segment, a segment that
    /// only abbreviates child names, or an array index out of range.
    pub fn resolve_from(&self, base: NodeId, path: &str) -> Option<NodeId> {
        if path.is_empty() {
            return None;
        }
        let mut cur = base;
        for seg in path.split(['/', '.']) {
            if seg.is_empty() {
                return None;
            }
            cur = self.find_child(cur, seg)?;
        }
        Some(cur)
    }

    /// Child of a composite by position.
    pub fn child_at(&self, id: NodeId, idx: usize) -> Option<NodeId> {
        self.node(id).children.get(idx).copied()
    }

    /// Child of a unit by exact name (children are name-sorted).
    pub(crate) fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        let node = self.node(id);
        node.children
            .binary_search_by(|c| self.node(*c).name.as_str().cmp(name))
            .ok()
            .map(|i| node.children[i])
    }

    /// The slash path of a node from the root.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let n = self.node(c);
            if n.parent.is_some() {
                parts.push(n.name.as_str());
            }
            cur = n.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    fn find_child(&self, id: NodeId, seg: &str) -> Option<NodeId> {
        let node = self.node(id);
        match node.kind {
            Kind::Array => {
                // indices are the literal child names: decimal, no sign, no
                // leading zeros
                if !seg.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                if seg.len() > 1 && seg.starts_with('0') {
                    return None;
                }
                let idx: usize = seg.parse().ok()?;
                node.children.get(idx).copied()
            }
            Kind::Unit => {
                for e in &node.lookup {
                    if seg.starts_with(e.prefix.as_str()) {
                        if self.node(e.child).name == seg {
                            return Some(e.child);
                        }
                        // prefix matched an abbreviation; keep scanning
                    } else if e.prefix.as_str() > seg {
                        // entries are sorted; we are past any possible match
                        break;
                    }
                }
                None
            }
            _ => None,
        }
    }
}

struct Builder {
    nodes: Vec<Node>,
    plan: OffsetPlan,
    sem_counter: u32,
}

impl Builder {
    fn build_composite(
        &mut self,
        name: &str,
        path: &str,
        kind: Kind,
        spec: &serde_json::Map<String, Value>,
        parent: Option<NodeId>,
    ) -> Result<NodeId, SchemaError> {
        let sem = self.sem_counter;
        self.sem_counter += 1;
        let id = self.push(Node {
            name: name.to_owned(),
            kind,
            data_offset: 0,
            size: 0,
            time_offset: 0,
            sem,
            parent,
            children: Vec::new(),
            lookup: Vec::new(),
            precision: None,
            hysteresis: 0,
            default: Value::Null,
        });

        // Child specs are the object-valued entries; scalar entries such as
        // `type` are the composite's own keys.
        let mut entries: Vec<(&str, &serde_json::Map<String, Value>)> = spec
            .iter()
            .filter_map(|(k, v)| v.as_object().map(|m| (k.as_str(), m)))
            .collect();

        match kind {
            Kind::Array => {
                let mut indexed = Vec::with_capacity(entries.len());
                for (k, m) in entries {
                    let idx: usize = k
                        .parse()
                        .map_err(|_| SchemaError::NonDenseArray(path.to_owned()))?;
                    indexed.push((idx, k, m));
                }
                indexed.sort_by_key(|e| e.0);
                for (want, (idx, _, _)) in indexed.iter().enumerate() {
                    if *idx != want {
                        return Err(SchemaError::NonDenseArray(path.to_owned()));
                    }
                }
                entries = indexed.into_iter().map(|(_, k, m)| (k, m)).collect();
            }
            _ => entries.sort_by(|a, b| a.0.cmp(b.0)),
        }

        let mut children = Vec::with_capacity(entries.len());
        for (key, child_spec) in entries {
            let child_path = if path.is_empty() {
                key.to_owned()
            } else {
                format!("{path}/{key}")
            };
            let child = match parse_element(&child_path, child_spec)? {
                ElementSpec::Unit => {
                    self.build_composite(key, &child_path, Kind::Unit, child_spec, Some(id))?
                }
                ElementSpec::Array => {
                    self.build_composite(key, &child_path, Kind::Array, child_spec, Some(id))?
                }
                ElementSpec::Primitive {
                    kind: prim_kind,
                    size,
                    default,
                    precision,
                    hysteresis,
                } => {
                    let class = Class::of(prim_kind).expect("primitive kind has a class");
                    let time_offset = self.plan.reserve_time();
                    let data_offset = self.plan.reserve(class, size);
                    self.push(Node {
                        name: key.to_owned(),
                        kind: prim_kind,
                        data_offset,
                        size,
                        time_offset,
                        sem,
                        parent: Some(id),
                        children: Vec::new(),
                        lookup: Vec::new(),
                        precision,
                        hysteresis,
                        default: default.clone(),
                    })
                }
            };
            children.push(child);
        }

        let lookup = match kind {
            Kind::Array => children
                .iter()
                .map(|&c| LookupEntry {
                    prefix: self.nodes[c.index()].name.clone(),
                    child: c,
                })
                .collect(),
            _ => self.build_lookup(&children),
        };

        let node = &mut self.nodes[id.index()];
        node.children = children;
        node.lookup = lookup;
        Ok(id)
    }

    /// Minimal disambiguating prefixes over name-sorted children: each
    /// child keeps one character more than its longest common prefix with
    /// either sorted neighbor (capped at the full name).
    fn build_lookup(&self, children: &[NodeId]) -> Vec<LookupEntry> {
        let names: Vec<&str> = children
            .iter()
            .map(|c| self.nodes[c.index()].name.as_str())
            .collect();
        (0..names.len())
            .map(|i| {
                let prev = if i > 0 { lcp_chars(names[i], names[i - 1]) } else { 0 };
                let next = if i + 1 < names.len() {
                    lcp_chars(names[i], names[i + 1])
                } else {
                    0
                };
                let keep = prev.max(next) + 1;
                let prefix: String = names[i].chars().take(keep).collect();
                LookupEntry {
                    prefix,
                    child: children[i],
                }
            })
            .collect()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }
}

/// Longest common prefix of two strings, in characters.
fn lcp_chars(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
