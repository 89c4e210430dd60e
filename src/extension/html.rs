//! Read-only HTML documents for scripts
//!
//! Parsed documents live in an [`HtmlStore`] owned by one script scope.
//! Scripts only ever hold integer handles; each handle names a node by its
//! child-index path from the document root, so the store never exposes a
//! mutable reference into the tree.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum HtmlError {
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
}

pub type NodeHandle = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    doc: usize,
    /// Empty for the document node itself
    path: Vec<usize>,
}

#[derive(Clone, Copy)]
enum Target<'a> {
    Document(&'a Html),
    Element(ElementRef<'a>),
}

impl<'a> Target<'a> {
    fn select(self, selector: &Selector) -> Vec<ElementRef<'a>> {
        match self {
            Target::Document(doc) => doc.select(selector).collect(),
            Target::Element(el) => el.select(selector).collect(),
        }
    }

    fn children(self) -> Vec<ElementRef<'a>> {
        match self {
            Target::Document(doc) => doc.tree.root().children().filter_map(ElementRef::wrap).collect(),
            Target::Element(el) => el.children().filter_map(ElementRef::wrap).collect(),
        }
    }

    fn element(self) -> Option<ElementRef<'a>> {
        match self {
            Target::Document(_) => None,
            Target::Element(el) => Some(el),
        }
    }
}

fn path_of(element: ElementRef<'_>) -> Vec<usize> {
    let mut path = Vec::new();
    let mut node = *element;
    while let Some(parent) = node.parent() {
        path.push(node.prev_siblings().count());
        node = parent;
    }
    path.reverse();
    path
}

fn parse_selector(selector: &str) -> Result<Selector, HtmlError> {
    Selector::parse(selector).map_err(|_| HtmlError::InvalidSelector(selector.to_string()))
}

#[derive(Default)]
pub struct HtmlStore {
    documents: Vec<Html>,
    nodes: Vec<NodeKey>,
    index: HashMap<NodeKey, NodeHandle>,
}

impl HtmlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `html` and return the handle of its document node
    pub fn load(&mut self, html: &str) -> NodeHandle {
        self.documents.push(Html::parse_document(html));
        let doc = self.documents.len() - 1;
        self.intern(NodeKey { doc, path: Vec::new() })
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Descendants of every root matching `selector`, in document order per
    /// root, without duplicates
    pub fn select(&mut self, roots: &[NodeHandle], selector: &str) -> Result<Vec<NodeHandle>, HtmlError> {
        let selector = parse_selector(selector)?;
        let keys = self.collect(roots, |target| target.select(&selector));
        Ok(self.intern_all(keys))
    }

    pub fn filter(&mut self, handles: &[NodeHandle], selector: &str) -> Result<Vec<NodeHandle>, HtmlError> {
        let selector = parse_selector(selector)?;
        let keys = self.collect(handles, |target| {
            target.element().filter(|el| selector.matches(el)).into_iter().collect()
        });
        Ok(self.intern_all(keys))
    }

    pub fn parent(&mut self, handles: &[NodeHandle]) -> Vec<NodeHandle> {
        let keys = self.collect(handles, |target| {
            target
                .element()
                .and_then(|el| el.parent())
                .and_then(ElementRef::wrap)
                .into_iter()
                .collect()
        });
        self.intern_all(keys)
    }

    pub fn children(&mut self, handles: &[NodeHandle], selector: Option<&str>) -> Result<Vec<NodeHandle>, HtmlError> {
        let selector = selector.map(parse_selector).transpose()?;
        let keys = self.collect(handles, |target| {
            target
                .children()
                .into_iter()
                .filter(|el| selector.as_ref().map_or(true, |s| s.matches(el)))
                .collect()
        });
        Ok(self.intern_all(keys))
    }

    pub fn next(&mut self, handles: &[NodeHandle]) -> Vec<NodeHandle> {
        let keys = self.collect(handles, |target| {
            target
                .element()
                .and_then(|el| el.next_siblings().find_map(ElementRef::wrap))
                .into_iter()
                .collect()
        });
        self.intern_all(keys)
    }

    pub fn prev(&mut self, handles: &[NodeHandle]) -> Vec<NodeHandle> {
        let keys = self.collect(handles, |target| {
            target
                .element()
                .and_then(|el| el.prev_siblings().find_map(ElementRef::wrap))
                .into_iter()
                .collect()
        });
        self.intern_all(keys)
    }

    /// Combined text of every handle
    pub fn text(&self, handles: &[NodeHandle]) -> String {
        handles
            .iter()
            .filter_map(|h| self.resolve(*h))
            .map(|target| match target {
                Target::Document(doc) => doc.root_element().text().collect::<String>(),
                Target::Element(el) => el.text().collect::<String>(),
            })
            .collect()
    }

    /// Inner markup of the first handle; the whole document for a document node
    pub fn inner_html(&self, handles: &[NodeHandle]) -> Option<String> {
        let target = handles.first().and_then(|h| self.resolve(*h))?;
        Some(match target {
            Target::Document(doc) => doc.html(),
            Target::Element(el) => el.inner_html(),
        })
    }

    pub fn outer_html(&self, handles: &[NodeHandle]) -> Option<String> {
        let target = handles.first().and_then(|h| self.resolve(*h))?;
        Some(match target {
            Target::Document(doc) => doc.html(),
            Target::Element(el) => el.html(),
        })
    }

    pub fn attr(&self, handles: &[NodeHandle], name: &str) -> Option<String> {
        let el = handles.first().and_then(|h| self.resolve(*h))?.element()?;
        el.value().attr(name).map(str::to_string)
    }

    pub fn has_class(&self, handles: &[NodeHandle], class: &str) -> bool {
        handles
            .iter()
            .filter_map(|h| self.resolve(*h).and_then(Target::element))
            .any(|el| el.value().classes().any(|c| c == class))
    }

    pub fn tag_name(&self, handle: NodeHandle) -> Option<String> {
        let el = self.resolve(handle)?.element()?;
        Some(el.value().name().to_string())
    }

    fn resolve(&self, handle: NodeHandle) -> Option<Target<'_>> {
        let key = self.nodes.get(handle as usize)?;
        let doc = self.documents.get(key.doc)?;
        if key.path.is_empty() {
            return Some(Target::Document(doc));
        }
        let mut node = doc.tree.root();
        for &i in &key.path {
            node = node.children().nth(i)?;
        }
        ElementRef::wrap(node).map(Target::Element)
    }

    fn collect<F>(&self, handles: &[NodeHandle], f: F) -> Vec<NodeKey>
    where
        F: for<'a> Fn(Target<'a>) -> Vec<ElementRef<'a>>,
    {
        let mut keys = Vec::new();
        for &handle in handles {
            let Some(doc) = self.nodes.get(handle as usize).map(|k| k.doc) else { continue };
            let Some(target) = self.resolve(handle) else { continue };
            keys.extend(f(target).into_iter().map(|el| NodeKey { doc, path: path_of(el) }));
        }
        keys
    }

    fn intern_all(&mut self, keys: Vec<NodeKey>) -> Vec<NodeHandle> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let handle = self.intern(key);
            if !out.contains(&handle) {
                out.push(handle);
            }
        }
        out
    }

    fn intern(&mut self, key: NodeKey) -> NodeHandle {
        if let Some(handle) = self.index.get(&key) {
            return *handle;
        }
        let handle = self.nodes.len() as NodeHandle;
        self.nodes.push(key.clone());
        self.index.insert(key, handle);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="post featured" id="p1"><a href="/one">One</a><span>2024</span></div>
          <div class="post" id="p2"><a href="/two">Two</a></div>
          <p>tail <b>bold</b></p>
        </body></html>
    "#;

    #[test]
    fn test_select_text_and_attr() {
        let mut store = HtmlStore::new();
        let doc = store.load(PAGE);

        let posts = store.select(&[doc], "div.post").unwrap();
        assert_eq!(posts.len(), 2);

        let links = store.select(&posts, "a").unwrap();
        assert_eq!(store.attr(&links, "href").as_deref(), Some("/one"));
        assert_eq!(store.text(&links), "OneTwo");
        assert_eq!(store.attr(&links[1..], "href").as_deref(), Some("/two"));
        assert_eq!(store.attr(&links, "missing"), None);
    }

    #[test]
    fn test_handles_are_stable() {
        let mut store = HtmlStore::new();
        let doc = store.load(PAGE);
        let first = store.select(&[doc], "#p1").unwrap();
        let again = store.select(&[doc], "div.featured").unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_relatives() {
        let mut store = HtmlStore::new();
        let doc = store.load(PAGE);
        let span = store.select(&[doc], "span").unwrap();

        let parent = store.parent(&span);
        assert_eq!(store.attr(&parent, "id").as_deref(), Some("p1"));

        let next = store.next(&parent);
        assert_eq!(store.attr(&next, "id").as_deref(), Some("p2"));
        assert_eq!(store.prev(&next), parent);

        let kids = store.children(&parent, None).unwrap();
        assert_eq!(kids.len(), 2);
        assert_eq!(store.tag_name(kids[0]).as_deref(), Some("a"));
        let only_span = store.children(&parent, Some("span")).unwrap();
        assert_eq!(only_span, span);
    }

    #[test]
    fn test_filter_and_has_class() {
        let mut store = HtmlStore::new();
        let doc = store.load(PAGE);
        let posts = store.select(&[doc], "div").unwrap();

        let featured = store.filter(&posts, ".featured").unwrap();
        assert_eq!(featured.len(), 1);
        assert!(store.has_class(&posts, "featured"));
        assert!(!store.has_class(&posts[1..], "featured"));
    }

    #[test]
    fn test_html_projection() {
        let mut store = HtmlStore::new();
        let doc = store.load(PAGE);
        let p = store.select(&[doc], "p").unwrap();

        assert_eq!(store.inner_html(&p).as_deref(), Some("tail <b>bold</b>"));
        assert_eq!(store.outer_html(&p).as_deref(), Some("<p>tail <b>bold</b></p>"));
        assert!(store.inner_html(&[doc]).unwrap().contains("id=\"p2\""));
        assert_eq!(store.inner_html(&[]), None);
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let mut store = HtmlStore::new();
        let doc = store.load(PAGE);
        let err = store.select(&[doc], "div[").unwrap_err();
        assert_eq!(err, HtmlError::InvalidSelector("div[".to_string()));
    }

    #[test]
    fn test_documents_do_not_mix() {
        let mut store = HtmlStore::new();
        let a = store.load("<ul><li>a</li></ul>");
        let b = store.load("<ul><li>b</li><li>c</li></ul>");
        assert_eq!(store.document_count(), 2);

        let la = store.select(&[a], "li").unwrap();
        let lb = store.select(&[b], "li").unwrap();
        assert_eq!(store.text(&la), "a");
        assert_eq!(store.text(&lb), "bc");
        assert!(la.iter().all(|h| !lb.contains(h)));
    }

    #[test]
    fn test_stale_handle_is_ignored() {
        let mut store = HtmlStore::new();
        store.load(PAGE);
        assert_eq!(store.text(&[999]), "");
        assert!(store.parent(&[999]).is_empty());
    }
}
