//! XML asset trees
//!
//! Export documents are parsed into an arena of nodes addressed by
//! [`NodeId`]. Removing a node detaches it from its parent and invalidates
//! its whole subtree; handles to removed nodes stay valid to hold but are
//! skipped by every traversal. Element names are matched by local name, so
//! namespace prefixes in the source do not matter to the filters.

pub mod bundle;
pub mod custom_attr;
pub mod flow;
pub mod glossary;
pub mod quality;

use std::collections::HashSet;
use std::path::Path;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{CatalogError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element {
        name: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    live: bool,
}

#[derive(Debug, Clone)]
pub struct XmlTree {
    nodes: Vec<Node>,
    root: NodeId,
}

fn local(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, l)| l)
}

fn xml_write<E: std::fmt::Display>(result: std::result::Result<(), E>) -> Result<()> {
    result.map_err(|e| CatalogError::Xml(e.to_string()))
}

impl XmlTree {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        loop {
            let event = reader.read_event()?;
            let (kind, opens) = match event {
                Event::Start(e) => (element(&e)?, true),
                Event::Empty(e) => (element(&e)?, false),
                Event::End(_) => {
                    stack.pop();
                    continue;
                }
                Event::Text(t) => {
                    let text = t.unescape()?.into_owned();
                    if text.trim().is_empty() {
                        continue;
                    }
                    (NodeKind::Text(text), false)
                }
                Event::CData(c) => (
                    NodeKind::CData(String::from_utf8_lossy(&c.into_inner()).into_owned()),
                    false,
                ),
                Event::Comment(c) => (
                    NodeKind::Comment(String::from_utf8_lossy(&c.into_inner()).into_owned()),
                    false,
                ),
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => continue,
                Event::Eof => break,
            };

            let parent = stack.last().copied();
            if parent.is_none() && !matches!(kind, NodeKind::Element { .. }) {
                continue;
            }
            let id = NodeId(nodes.len());
            nodes.push(Node {
                kind,
                parent,
                children: Vec::new(),
                live: true,
            });
            match parent {
                Some(p) => nodes[p.0].children.push(id),
                None if root.is_none() => root = Some(id),
                None => {
                    return Err(CatalogError::Xml("document has more than one root element".into()))
                }
            }
            if opens {
                stack.push(id);
            }
        }

        let root = root.ok_or_else(|| CatalogError::Xml("document has no root element".into()))?;
        Ok(Self { nodes, root })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes[id.0].live
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    /// Qualified element name; empty for non-elements
    pub fn name(&self, id: NodeId) -> &str {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, .. } => name,
            _ => "",
        }
    }

    pub fn local_name(&self, id: NodeId) -> &str {
        local(self.name(id))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: impl Into<String>) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[id.0].kind {
            let value = value.into();
            match attributes.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value,
                None => attributes.push((key.to_string(), value)),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, key: &str) {
        if let NodeKind::Element { attributes, .. } = &mut self.nodes[id.0].kind {
            attributes.retain(|(k, _)| k != key);
        }
    }

    /// Live children of any kind
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(move |c| self.nodes[c.0].live)
    }

    /// Live child elements with the given local name
    pub fn children_named<'a>(&'a self, id: NodeId, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.children(id).filter(move |c| self.local_name(*c) == name)
    }

    pub fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children_named(id, name).next()
    }

    /// Elements reached by following `path` (local names) from `from`
    pub fn select(&self, from: NodeId, path: &[&str]) -> Vec<NodeId> {
        let mut current = vec![from];
        for step in path {
            current = current
                .into_iter()
                .flat_map(|n| self.children_named(n, step).collect::<Vec<_>>())
                .collect();
        }
        current
    }

    /// Live descendants (not including `from`) with the given local name, in document order
    pub fn descendants_named(&self, from: NodeId, name: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut pending: Vec<NodeId> = self.children(from).collect();
        pending.reverse();
        while let Some(id) = pending.pop() {
            if self.local_name(id) == name {
                found.push(id);
            }
            let mut kids: Vec<NodeId> = self.children(id).collect();
            kids.reverse();
            pending.extend(kids);
        }
        found
    }

    /// Concatenated text content of a node's direct text children
    pub fn text(&self, id: NodeId) -> String {
        self.children(id)
            .filter_map(|c| match &self.nodes[c.0].kind {
                NodeKind::Text(t) | NodeKind::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Detach a node and invalidate its subtree
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root || !self.nodes[id.0].live {
            return;
        }
        if let Some(parent) = self.nodes[id.0].parent {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
        let mut pending = vec![id];
        while let Some(n) = pending.pop() {
            self.nodes[n.0].live = false;
            pending.extend(self.nodes[n.0].children.iter().copied());
        }
    }

    /// Remove `id` when it has no element children left
    pub fn remove_if_empty(&mut self, id: NodeId) -> bool {
        let empty = self
            .children(id)
            .all(|c| !matches!(self.nodes[c.0].kind, NodeKind::Element { .. }));
        if empty {
            self.remove(id);
        }
        empty
    }

    pub fn append_element(&mut self, parent: NodeId, name: &str, attributes: Vec<(String, String)>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind: NodeKind::Element {
                name: name.to_string(),
                attributes,
            },
            parent: Some(parent),
            children: Vec::new(),
            live: true,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Space-separated IDs held by an attribute
    pub fn id_list(&self, id: NodeId, key: &str) -> Vec<String> {
        self.attr(id, key)
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Keep only IDs accepted by `keep`; an emptied list removes the attribute.
    /// Returns whether anything changed.
    pub fn retain_ids(&mut self, id: NodeId, key: &str, keep: impl Fn(&str) -> bool) -> bool {
        let Some(current) = self.attr(id, key) else {
            return false;
        };
        let ids: Vec<&str> = current.split_whitespace().collect();
        let kept: Vec<&str> = ids.iter().copied().filter(|i| keep(i)).collect();
        if kept.len() == ids.len() {
            return false;
        }
        let joined = kept.join(" ");
        if joined.is_empty() {
            self.remove_attr(id, key);
        } else {
            self.set_attr(id, key, joined);
        }
        true
    }

    /// Every value of attribute `key` on live elements
    pub fn attribute_values(&self, key: &str) -> HashSet<String> {
        self.live_elements()
            .filter_map(|n| self.attr(n, key).map(str::to_string))
            .collect()
    }

    pub fn live_elements(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len())
            .map(NodeId)
            .filter(move |n| self.nodes[n.0].live && matches!(self.nodes[n.0].kind, NodeKind::Element { .. }))
    }

    /// ID-list attributes in `list_keys` that point at IDs no live element
    /// carries in `id_key`
    pub fn dangling_references(&self, id_key: &str, list_keys: &[&str]) -> Vec<(NodeId, String)> {
        let known = self.attribute_values(id_key);
        let mut dangling = Vec::new();
        for node in self.live_elements() {
            for key in list_keys {
                for reference in self.id_list(node, key) {
                    if !known.contains(&reference) {
                        dangling.push((node, reference));
                    }
                }
            }
        }
        dangling
    }

    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        xml_write(writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None))))?;
        self.write_node(&mut writer, self.root)?;
        String::from_utf8(writer.into_inner()).map_err(|e| CatalogError::Xml(e.to_string()))
    }

    fn write_node(&self, writer: &mut Writer<Vec<u8>>, id: NodeId) -> Result<()> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, attributes } => {
                let mut start = BytesStart::new(name.as_str());
                for (k, v) in attributes {
                    start.push_attribute((k.as_str(), v.as_str()));
                }
                let children: Vec<NodeId> = self.children(id).collect();
                if children.is_empty() {
                    xml_write(writer.write_event(Event::Empty(start)))?;
                } else {
                    xml_write(writer.write_event(Event::Start(start)))?;
                    for child in children {
                        self.write_node(writer, child)?;
                    }
                    xml_write(writer.write_event(Event::End(BytesEnd::new(name.as_str()))))?;
                }
            }
            NodeKind::Text(t) => xml_write(writer.write_event(Event::Text(BytesText::new(t))))?,
            NodeKind::CData(t) => xml_write(writer.write_event(Event::CData(BytesCData::new(t.as_str()))))?,
            NodeKind::Comment(t) => xml_write(writer.write_event(Event::Comment(BytesText::from_escaped(t.as_str()))))?,
        }
        Ok(())
    }
}

fn element(start: &BytesStart<'_>) -> Result<NodeKind> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(NodeKind::Element { name, attributes })
}
