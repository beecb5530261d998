//! End-to-end checks of the library's observable guarantees

use std::sync::{Arc, Mutex};

use tagstore_core::filter::{NodeFilter, TagFilter};
use tagstore_core::models::{Identity, Locator, Node, Tag, TagClass, TagValue, ValueType};
use tagstore_core::{Library, LibraryEvent, Listener, NodeSet, SetEvent, TagSet};

struct Fixture {
    library: Arc<Library>,
    tags: Vec<Tag>,
    /// Re-read after linking
    nodes: Vec<Node>,
    /// Copies returned by `create_node`, held across the linking
    held: Vec<Node>,
}

fn class(library: &Library, name: &str, value_type: ValueType) -> TagClass {
    library
        .create_tag_class(&TagClass::new(name, value_type).unwrap())
        .unwrap()
}

fn fixture() -> Fixture {
    let library = Arc::new(Library::open_in_memory().unwrap());
    let author = class(&library, "author", ValueType::Text);
    let title = class(&library, "title", ValueType::Text);
    let year = class(&library, "year", ValueType::Number);
    let source = class(&library, "source", ValueType::Locator);
    let series = class(&library, "series", ValueType::NodeReference);

    let alice = library.create_node("{title} by {author}").unwrap();
    let hunting = library.create_node("{title}").unwrap();
    let collection = library.create_node("collected works").unwrap();
    let empty = library.create_node("Empty").unwrap();

    let values = [
        (&author, TagValue::text("Lewis Carrol")),
        (&author, TagValue::text("Mervyn Peake")),
        (&author, TagValue::text("lewis")),
        (&title, TagValue::text("Alice's Adventures")),
        (&title, TagValue::text("The Hunting of the Snark")),
        (&title, TagValue::text("a_b%c")),
        (&year, TagValue::number(1865)),
        (&year, TagValue::number(1876.5)),
        (&year, TagValue::number(-3)),
        (
            &source,
            TagValue::Locator(Locator::parse("https://example.com/alice").unwrap()),
        ),
        (&series, TagValue::NodeReference(collection.identity)),
        (&year, TagValue::number(9_007_199_254_740_993i64)),
    ];
    let tags: Vec<Tag> = values
        .into_iter()
        .map(|(class, value)| library.create_tag(class, value).unwrap())
        .collect();

    for i in [0, 3, 6, 9, 10] {
        library.create_link(&alice, &tags[i]).unwrap();
    }
    for i in [1, 4, 7] {
        library.create_link(&hunting, &tags[i]).unwrap();
    }

    let nodes = library.nodes(&NodeFilter::all()).unwrap();
    Fixture {
        library,
        tags,
        nodes,
        held: vec![alice, hunting, collection, empty],
    }
}

fn tag_filters(f: &Fixture) -> Vec<(&'static str, TagFilter)> {
    let node = f.nodes[0].identity;
    vec![
        ("all", TagFilter::all()),
        ("block", TagFilter::block()),
        ("class name", TagFilter::class_name("AUTHOR")),
        ("class wildcard", TagFilter::class_wildcard("s*")),
        ("class object", TagFilter::class(f.tags[6].class())),
        ("id", TagFilter::id(f.tags[2].identity)),
        ("unflushed id", TagFilter::id(Identity::new())),
        ("text", TagFilter::text("LEWIS CARROL")),
        ("text wildcard", TagFilter::text_wildcard("*snark")),
        ("text single char", TagFilter::text_wildcard("lewi?")),
        ("text literal specials", TagFilter::text_wildcard("a_b%c")),
        ("empty wildcard", TagFilter::text_wildcard("")),
        ("number eq", TagFilter::number("=", 1865).unwrap()),
        ("number gt", TagFilter::number(">", 0).unwrap()),
        ("number le", TagFilter::number("≤", 1865).unwrap()),
        ("number ne", TagFilter::number("!=", 1865).unwrap()),
        (
            "number past real precision",
            TagFilter::number("=", 9_007_199_254_740_992.0).unwrap(),
        ),
        (
            "number above rounded real",
            TagFilter::number(">", 9_007_199_254_740_992.0).unwrap(),
        ),
        (
            "locator",
            TagFilter::locator(&Locator::parse("https://example.com/alice").unwrap()),
        ),
        ("node reference", TagFilter::node_reference(f.nodes[2].identity)),
        ("value type", TagFilter::value_type(ValueType::Number)),
        ("value", TagFilter::value(&TagValue::text("mervyn peake")).unwrap()),
        ("unused", TagFilter::unused()),
        ("linked with", TagFilter::linked_with(node)),
        (
            "and",
            TagFilter::class_name("author").and(TagFilter::text_wildcard("*e*")),
        ),
        (
            "or",
            TagFilter::class_name("year").or(TagFilter::text_wildcard("the *")),
        ),
        ("not", TagFilter::unused().negate()),
        ("not of null", TagFilter::all().negate()),
        ("and with null", TagFilter::all().and(TagFilter::class_name("title"))),
        ("or with null", TagFilter::all().or(TagFilter::class_name("title"))),
        (
            "nested",
            TagFilter::class_name("author")
                .negate()
                .and(TagFilter::unused().or(TagFilter::number("<", 1870).unwrap())),
        ),
    ]
}

#[test]
fn test_tag_filters_agree_with_queries() {
    let f = fixture();
    let all = f.library.tags(&TagFilter::all()).unwrap();
    assert_eq!(all.len(), f.tags.len());

    for (name, filter) in tag_filters(&f) {
        let queried: Vec<Identity> = f
            .library
            .tags(&filter)
            .unwrap()
            .iter()
            .map(|t| t.identity)
            .collect();
        let matched: Vec<Identity> = all
            .iter()
            .filter(|t| filter.matches(t, &*f.library).unwrap())
            .map(|t| t.identity)
            .collect();
        assert_eq!(queried, matched, "filter '{}' disagrees", name);
        assert_eq!(
            f.library.tag_count(&filter).unwrap(),
            matched.len() as u64,
            "count for '{}'",
            name
        );
    }
}

fn node_filters(f: &Fixture) -> Vec<(&'static str, NodeFilter)> {
    vec![
        ("display name", NodeFilter::display_name("empty")),
        ("display name wildcard", NodeFilter::display_name_wildcard("{title}*")),
        ("id", NodeFilter::id(f.nodes[1].identity)),
        ("no tags", NodeFilter::no_tags()),
        ("has tag", NodeFilter::has_tag(TagFilter::class_name("year"))),
        (
            "has tag combined",
            NodeFilter::has_tag(TagFilter::number(">", 1870).unwrap())
                .or(NodeFilter::no_tags()),
        ),
        (
            "lacks tag",
            NodeFilter::has_tag(TagFilter::text("lewis carrol")).negate(),
        ),
    ]
}

fn assert_node_filters_agree(f: &Fixture, nodes: &[Node]) {
    for (name, filter) in node_filters(f) {
        let queried: Vec<Identity> = f
            .library
            .nodes(&filter)
            .unwrap()
            .iter()
            .map(|n| n.identity)
            .collect();
        let matched: Vec<Identity> = nodes
            .iter()
            .filter(|n| filter.matches(n, &*f.library).unwrap())
            .map(|n| n.identity)
            .collect();
        assert_eq!(queried, matched, "filter '{}' disagrees", name);
    }
}

#[test]
fn test_node_filters_agree_with_queries() {
    let f = fixture();
    let all = f.library.nodes(&NodeFilter::all()).unwrap();
    assert_node_filters_agree(&f, &all);
}

#[test]
fn test_held_node_copies_agree_with_queries() {
    let mut f = fixture();
    let held = f.held.clone();
    assert_node_filters_agree(&f, &held);

    // Later link changes and template-only flushes of the held copies
    f.library.remove_link(&held[0], &f.tags[0]).unwrap();
    f.library.create_link(&held[3], &f.tags[8]).unwrap();
    for node in f.held.iter_mut() {
        let template = format!("{} ", node.display_name_template());
        node.set_display_name_template(template).unwrap();
        f.library.flush_node(node).unwrap();
    }
    assert_eq!(f.library.node_tags(&f.held[1].identity).unwrap().len(), 3);
    assert_eq!(f.library.node_tags(&f.held[3].identity).unwrap().len(), 1);
    let held = f.held.clone();
    assert_node_filters_agree(&f, &held);
    assert_eq!(
        f.library.display_name(&held[0]).unwrap(),
        "Alice's Adventures by  "
    );
}

#[test]
fn test_paging_applies_to_queries() {
    let f = fixture();
    let page = f
        .library
        .tags(&TagFilter::all().with_limit(3).with_offset(2))
        .unwrap();
    let ids: Vec<Identity> = page.iter().map(|t| t.identity).collect();
    let expected: Vec<Identity> = f.tags[2..5].iter().map(|t| t.identity).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_duplicate_tags_are_deduplicated() {
    let library = Library::open_in_memory().unwrap();
    let author = class(&library, "author", ValueType::Text);
    let first = library
        .create_tag(&author, TagValue::text("Lewis Carrol"))
        .unwrap();
    let second = library
        .create_tag(&author, TagValue::text("lewis carrol"))
        .unwrap();
    assert_eq!(first.identity, second.identity);
    assert_eq!(library.tag_count(&TagFilter::all()).unwrap(), 1);
}

#[test]
fn test_class_removal_needs_cascade() {
    let library = Library::open_in_memory().unwrap();
    let mut author = class(&library, "author", ValueType::Text);
    library.create_tag(&author, TagValue::text("Lewis")).unwrap();

    let err = library.remove_tag_class(&mut author, false).unwrap_err();
    assert!(err.is_library_error());
    assert_eq!(library.tag_count(&TagFilter::all()).unwrap(), 1);

    library.remove_tag_class(&mut author, true).unwrap();
    assert_eq!(library.tag_count(&TagFilter::all()).unwrap(), 0);
    assert!(library.tag_class("author").unwrap().is_none());
    assert!(!author.is_flushed());
}

#[test]
fn test_node_set_follows_linking() {
    let library = Arc::new(Library::open_in_memory().unwrap());
    let author = class(&library, "author", ValueType::Text);
    let set = NodeSet::new(
        &library,
        NodeFilter::has_tag(TagFilter::class_name("author").and(TagFilter::text("Lewis Carrol"))),
    );
    assert_eq!(set.len().unwrap(), 0);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    set.on_change(move |e| sink.lock().unwrap().push(e.clone()));

    let mut book = Node::new("{author}").unwrap();
    book.link(&library, Tag::new(&author, TagValue::text("Lewis Carrol")).unwrap())
        .unwrap();
    library.flush_node(&mut book).unwrap();
    assert_eq!(set.len().unwrap(), 1);
    let appeared = |events: &[SetEvent]| {
        events
            .iter()
            .filter(|e| matches!(e, SetEvent::Appeared(_)))
            .count()
    };
    assert_eq!(appeared(&events.lock().unwrap()), 1);

    let tag = library.node_tags(&book.identity).unwrap().remove(0);
    book.unlink(&library, &tag).unwrap();
    library.flush_node(&mut book).unwrap();
    assert_eq!(set.len().unwrap(), 0);
    assert_eq!(
        events.lock().unwrap().last(),
        Some(&SetEvent::Disappeared(book.identity))
    );
}

#[test]
fn test_paused_set_ignores_changes_until_resumed() {
    let library = Arc::new(Library::open_in_memory().unwrap());
    let author = class(&library, "author", ValueType::Text);
    let set = TagSet::new(&library, TagFilter::class_name("author"));
    library.create_tag(&author, TagValue::text("Lewis")).unwrap();
    let before = set.identities().unwrap();
    assert_eq!(before.len(), 1);

    set.pause();
    let mut lewis = library.tag(&before[0]).unwrap().unwrap();
    library.remove_tag(&mut lewis, true).unwrap();
    library.create_tag(&author, TagValue::text("Peake")).unwrap();
    library.create_tag(&author, TagValue::text("Tolkien")).unwrap();
    assert_eq!(set.identities().unwrap(), before);

    set.resume().unwrap();
    let texts: Vec<String> = set
        .entities()
        .unwrap()
        .iter()
        .map(|t| t.value().to_string())
        .collect();
    assert_eq!(texts, vec!["Peake", "Tolkien"]);
}

#[derive(Default)]
struct Kinds(Mutex<Vec<&'static str>>);

impl Listener for Kinds {
    fn on_event(&self, _library: &Library, event: &LibraryEvent) {
        self.0.lock().unwrap().push(event.kind());
    }
}

#[test]
fn test_failed_transaction_restores_everything() {
    let library = Library::open_in_memory().unwrap();
    let author = class(&library, "author", ValueType::Text);
    let tag = library.create_tag(&author, TagValue::text("Lewis")).unwrap();
    let node = library.create_node("{author}").unwrap();
    library.create_link(&node, &tag).unwrap();

    let kinds = Arc::new(Kinds::default());
    library.subscribe(&kinds);

    let result: anyhow::Result<()> = library.transaction(|lib| {
        let year = lib.create_tag_class(&TagClass::new("year", ValueType::Number)?)?;
        let new_tag = lib.create_tag(&year, TagValue::number(1865))?;
        lib.create_link(&node, &new_tag)?;
        let mut renamed = author.clone();
        renamed.set_name("writer")?;
        lib.flush_tag_class(&mut renamed)?;
        anyhow::bail!("abort halfway");
    });
    assert!(result.is_err());

    assert_eq!(*kinds.0.lock().unwrap(), vec!["library_reset"]);
    assert!(library.tag_class("year").unwrap().is_none());
    assert!(library.tag_class("author").unwrap().is_some());
    assert!(library.tag_class("writer").unwrap().is_none());
    assert_eq!(library.tag_count(&TagFilter::all()).unwrap(), 1);
    let linked = library.node_tags(&node.identity).unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].identity, tag.identity);
}

#[test]
fn test_library_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("books.db");
    let (tag_id, node_id) = {
        let library = Library::open(&path).unwrap();
        let author = class(&library, "author", ValueType::Text);
        let tag = library.create_tag(&author, TagValue::text("Lewis")).unwrap();
        let node = library.create_node("{author}").unwrap();
        library.create_link(&node, &tag).unwrap();
        library.set_meta("profile", Some("books")).unwrap();
        (tag.identity.id(), node.identity.id())
    };

    let library = Library::open(&path).unwrap();
    assert_eq!(library.get_meta("PROFILE").unwrap().as_deref(), Some("books"));
    let node = library
        .nodes(&NodeFilter::has_tag(TagFilter::text("lewis")))
        .unwrap()
        .remove(0);
    assert_eq!(node.identity.id(), node_id);
    assert_eq!(library.display_name(&node).unwrap(), "Lewis");
    assert_eq!(library.node_tags(&node.identity).unwrap()[0].identity.id(), tag_id);
}
