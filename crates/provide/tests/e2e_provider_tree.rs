#![forbid(unsafe_code)]

//! E2E tests driving a three-level provider tree.
//!
//! The tree mirrors a small application:
//!
//! ```text
//! root   Settings (value), Client (lazy), Theme (observable value)
//!  └─ mid    RequestId (factory), Status (stream), Settings in "admin"
//!      └─ leaf   Settings (value, shadows root)
//! ```
//!
//! Validates that:
//! 1. Values resolve from the nearest publishing ancestor, per scope.
//! 2. Lazy providers initialize once no matter which node reads them.
//! 3. Factories resolve their own dependencies from the requesting node.
//! 4. A multi-watch over a value and a stream re-reads both on each signal.
//! 5. Rebuild signalling follows registry identity up the chain.
//! 6. Detaching a node disposes its providers and nothing above it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::executor::{LocalPool, block_on};
use provide::{
    BoxError, Dependency, Observable, ProvideContext, ProvideError, Provider, ProviderNode,
    Providers, Scope, read, watch, watch_many,
};

// ============================================================================
// Helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Settings {
    locale: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
struct Client {
    base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Theme {
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Status {
    Connecting,
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq)]
struct RequestId(String);

struct Tree {
    pool: LocalPool,
    root: Rc<ProviderNode>,
    mid: Rc<ProviderNode>,
    leaf: Rc<ProviderNode>,
    theme: Observable<Theme>,
    status: UnboundedSender<Status>,
    admin: Scope,
    client_inits: Rc<Cell<u32>>,
    mid_disposed: Rc<Cell<u32>>,
}

fn build_tree() -> Tree {
    let pool = LocalPool::new();
    let theme = Observable::new(Theme::Light);
    let admin = Scope::new("admin");
    let client_inits = Rc::new(Cell::new(0));
    let mid_disposed = Rc::new(Cell::new(0));

    let mut root = Providers::new();
    root.provide_value(Settings { locale: "en" });
    let inits = Rc::clone(&client_inits);
    root.provide_lazy(move |cx: &ProvideContext<'_>| {
        inits.set(inits.get() + 1);
        let settings: Settings = cx.read().unwrap_or(Settings { locale: "??" });
        Client {
            base_url: format!("https://api.example/{}", settings.locale),
        }
    });
    root.provide(Provider::listenable_value(theme.clone()));
    let root = ProviderNode::root(root);

    let (status, status_rx) = mpsc::unbounded();
    let mut mid = Providers::new();
    let counter = Rc::new(Cell::new(0u32));
    mid.provide_factory(move |cx: &ProvideContext<'_>| {
        let n = counter.get();
        counter.set(n + 1);
        let locale = cx.read::<Settings>().map(|s| s.locale).unwrap_or("??");
        RequestId(format!("{locale}-{n}"))
    });
    let disposed = Rc::clone(&mid_disposed);
    let status_provider = Provider::from_stream(status_rx, Status::Connecting, &pool.spawner())
        .expect("spawn status pump")
        .on_dispose(move || async move {
            disposed.set(disposed.get() + 1);
            Ok::<(), BoxError>(())
        });
    mid.provide(status_provider);
    mid.provide_in(Provider::value(Settings { locale: "root" }), &admin);
    let mid = root.child(mid);

    let mut leaf = Providers::new();
    leaf.provide_value(Settings { locale: "fr" });
    let leaf = mid.child(leaf);

    Tree {
        pool,
        root,
        mid,
        leaf,
        theme,
        status,
        admin,
        client_inits,
        mid_disposed,
    }
}

// ============================================================================
// 1. Nearest ancestor, per scope
// ============================================================================

#[test]
fn values_resolve_from_nearest_publisher() {
    let tree = build_tree();

    assert_eq!(
        read::<Settings>(&tree.leaf, &Scope::DEFAULT).unwrap(),
        Settings { locale: "fr" }
    );
    assert_eq!(
        read::<Settings>(&tree.mid, &Scope::DEFAULT).unwrap(),
        Settings { locale: "en" }
    );
    assert_eq!(
        read::<Settings>(&tree.leaf, &tree.admin).unwrap(),
        Settings { locale: "root" }
    );
    assert!(matches!(
        read::<Settings>(&tree.root, &tree.admin),
        Err(ProvideError::NotFound { .. })
    ));
    assert_eq!(read::<Theme>(&tree.leaf, &Scope::DEFAULT).ok(), None);
}

// ============================================================================
// 2. Lazy initializes once
// ============================================================================

#[test]
fn lazy_client_is_shared_across_readers() {
    let tree = build_tree();
    assert_eq!(tree.client_inits.get(), 0);

    // The first reader's context decides the locale.
    let from_leaf = read::<Client>(&tree.leaf, &Scope::DEFAULT).unwrap();
    let from_root = read::<Client>(&tree.root, &Scope::DEFAULT).unwrap();
    assert_eq!(tree.client_inits.get(), 1);
    assert_eq!(from_leaf.base_url, "https://api.example/fr");
    assert_eq!(from_leaf, from_root);
}

// ============================================================================
// 3. Factories resolve from the requester
// ============================================================================

#[test]
fn factory_sees_requesting_node() {
    let tree = build_tree();
    let a = read::<RequestId>(&tree.leaf, &Scope::DEFAULT).unwrap();
    let b = read::<RequestId>(&tree.mid, &Scope::DEFAULT).unwrap();
    let c = read::<RequestId>(&tree.leaf, &Scope::DEFAULT).unwrap();
    assert_eq!(a, RequestId("fr-0".into()));
    assert_eq!(b, RequestId("en-1".into()));
    assert_eq!(c, RequestId("fr-2".into()));

    assert!(matches!(
        watch::<RequestId>(&tree.leaf, &Scope::DEFAULT),
        Err(ProvideError::NotObservable { .. })
    ));
}

// ============================================================================
// 4. Multi-watch across levels
// ============================================================================

#[test]
fn multi_watch_rereads_theme_and_status() {
    let mut tree = build_tree();
    let multi = watch_many(
        &tree.leaf,
        [
            Dependency::of::<Observable<Theme>>(),
            Dependency::of::<Status>(),
            Dependency::of::<Settings>(),
        ],
    )
    .unwrap();

    let frames: Rc<RefCell<Vec<(Theme, Status)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&frames);
    let _sub = multi.on_change(move |values| {
        let theme = values.get::<Observable<Theme>>().unwrap().get();
        let status = values.get::<Status>().unwrap();
        assert_eq!(values.get::<Settings>().unwrap().locale, "fr");
        sink.borrow_mut().push((theme, status));
    });

    let initial = multi.values();
    assert_eq!(initial.get::<Status>().unwrap(), Status::Connecting);

    tree.status.unbounded_send(Status::Online).unwrap();
    tree.status.unbounded_send(Status::Online).unwrap();
    tree.pool.run_until_stalled();
    tree.theme.set(Theme::Dark);
    tree.status.unbounded_send(Status::Offline).unwrap();
    tree.pool.run_until_stalled();

    assert_eq!(
        *frames.borrow(),
        vec![
            (Theme::Light, Status::Online),
            (Theme::Dark, Status::Online),
            (Theme::Dark, Status::Offline),
        ]
    );
}

// ============================================================================
// 5. Rebuild signalling
// ============================================================================

#[test]
fn rebuild_signal_follows_registry_identity() {
    let tree = build_tree();

    // Rebuilding the leaf around the same registry and parent is a no-op.
    let same_leaf = ProviderNode::attach(Rc::clone(tree.leaf.providers()), Some(&tree.mid), true);
    assert!(!same_leaf.should_notify(&tree.leaf));

    // A new mid registry invalidates everything below it.
    let new_mid = tree.root.child(Providers::new());
    let moved_leaf = ProviderNode::attach(Rc::clone(tree.leaf.providers()), Some(&new_mid), true);
    assert!(moved_leaf.should_notify(&tree.leaf));

    // With the mid registry gone, the leaf's Status lookup now misses.
    assert!(moved_leaf.find::<Status>(&Scope::DEFAULT).is_none());
}

// ============================================================================
// 6. Detach
// ============================================================================

#[test]
fn detaching_mid_disposes_only_its_providers() {
    let mut tree = build_tree();
    let status = tree.mid.resolve::<Status>(&Scope::DEFAULT).unwrap();
    let settings = tree.root.resolve::<Settings>(&Scope::DEFAULT).unwrap();

    tree.status.unbounded_send(Status::Online).unwrap();
    tree.pool.run_until_stalled();

    block_on(tree.mid.detach()).unwrap();
    assert_eq!(tree.mid_disposed.get(), 1);
    assert!(status.is_disposed());
    assert!(!settings.is_disposed());

    // The pump is gone; later elements never arrive.
    let _ = tree.status.unbounded_send(Status::Offline);
    tree.pool.run_until_stalled();
    assert_eq!(status.get(&ProvideContext::detached()), Status::Online);

    // A second detach finds everything already disposed.
    block_on(tree.mid.detach()).unwrap();
    assert_eq!(tree.mid_disposed.get(), 1);
}
