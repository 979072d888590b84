//! Console registry for ConVars and ConCommands.
//!
//! The registry maps names to items without owning them: it keeps [`Weak`]
//! references and the declaring code keeps the `Arc`. Dropping the last
//! `Arc` of an item removes it from whichever registry (or the pending set)
//! holds it at that moment.
//!
//! Items declared before a hub exists are staged in a process-wide pending
//! set. The hub that adopts the pending set drains it on construction and
//! hands its remaining items back when it is dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use super::concommand::ConCommand;
use super::convar::{ConVar, ConVarDyn, ConVarValue};
use super::lock;

/// Kind of a console item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Var,
    Cmd,
}

/// Filter used by lookups and listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemFilter {
    #[default]
    All,
    Vars,
    Cmds,
}

impl ItemFilter {
    #[inline]
    pub fn matches(self, kind: ItemKind) -> bool {
        match self {
            ItemFilter::All => true,
            ItemFilter::Vars => kind == ItemKind::Var,
            ItemFilter::Cmds => kind == ItemKind::Cmd,
        }
    }
}

/// A registered console item.
#[derive(Clone)]
pub enum ConItem {
    /// A console variable.
    Var(Arc<dyn ConVarDyn>),
    /// A console command.
    Cmd(Arc<ConCommand>),
}

impl ConItem {
    /// Get the name of this item.
    pub fn name(&self) -> &str {
        self.header().name()
    }

    /// Get the description of this item.
    pub fn description(&self) -> &str {
        self.header().description()
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            ConItem::Var(_) => ItemKind::Var,
            ConItem::Cmd(_) => ItemKind::Cmd,
        }
    }

    /// Check if this is a variable.
    pub fn is_var(&self) -> bool {
        matches!(self, ConItem::Var(_))
    }

    /// Check if this is a command.
    pub fn is_cmd(&self) -> bool {
        matches!(self, ConItem::Cmd(_))
    }

    pub fn as_var(&self) -> Option<&Arc<dyn ConVarDyn>> {
        match self {
            ConItem::Var(var) => Some(var),
            ConItem::Cmd(_) => None,
        }
    }

    pub fn as_cmd(&self) -> Option<&Arc<ConCommand>> {
        match self {
            ConItem::Cmd(cmd) => Some(cmd),
            ConItem::Var(_) => None,
        }
    }

    /// Whether both refer to the same item.
    pub fn same_item(&self, other: &ConItem) -> bool {
        match (self, other) {
            (ConItem::Var(a), ConItem::Var(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (ConItem::Cmd(a), ConItem::Cmd(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn header(&self) -> &ItemHeader {
        match self {
            ConItem::Var(var) => var.header(),
            ConItem::Cmd(cmd) => cmd.header(),
        }
    }

    fn downgrade(&self) -> WeakItem {
        match self {
            ConItem::Var(var) => WeakItem::Var(Arc::downgrade(var)),
            ConItem::Cmd(cmd) => WeakItem::Cmd(Arc::downgrade(cmd)),
        }
    }
}

impl<T: ConVarValue> From<Arc<ConVar<T>>> for ConItem {
    fn from(var: Arc<ConVar<T>>) -> Self {
        ConItem::Var(var)
    }
}

impl From<Arc<ConCommand>> for ConItem {
    fn from(cmd: Arc<ConCommand>) -> Self {
        ConItem::Cmd(cmd)
    }
}

#[derive(Clone)]
enum WeakItem {
    Var(Weak<dyn ConVarDyn>),
    Cmd(Weak<ConCommand>),
}

impl WeakItem {
    fn upgrade(&self) -> Option<ConItem> {
        match self {
            WeakItem::Var(var) => var.upgrade().map(ConItem::Var),
            WeakItem::Cmd(cmd) => cmd.upgrade().map(ConItem::Cmd),
        }
    }

    /// Whether this refers to `item`, without upgrading.
    fn points_to(&self, item: &ConItem) -> bool {
        match (self, item) {
            (WeakItem::Var(weak), ConItem::Var(var)) => std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(var)),
            (WeakItem::Cmd(weak), ConItem::Cmd(cmd)) => std::ptr::eq(weak.as_ptr(), Arc::as_ptr(cmd)),
            _ => false,
        }
    }

    fn is_dead(&self) -> bool {
        match self {
            WeakItem::Var(var) => var.strong_count() == 0,
            WeakItem::Cmd(cmd) => cmd.strong_count() == 0,
        }
    }
}

#[derive(Default)]
enum Owner {
    #[default]
    Detached,
    Pending,
    Registry(Weak<Registry>),
}

/// Name, description and registry link shared by every console item.
pub struct ItemHeader {
    name: Box<str>,
    description: Box<str>,
    owner: Mutex<Owner>,
}

impl ItemHeader {
    pub(crate) fn new(name: Box<str>, description: Box<str>) -> Self {
        crate::afw_assert!(!name.is_empty(), "console item name must not be empty");
        Self {
            name,
            description,
            owner: Mutex::new(Owner::Detached),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    fn set_owner(&self, owner: Owner) {
        *lock(&self.owner) = owner;
    }

    /// Remove the (dying) item from whoever holds it. Called from `Drop`.
    pub(crate) fn detach(&mut self) {
        let owner = std::mem::take(self.owner.get_mut().unwrap_or_else(|e| e.into_inner()));
        match owner {
            Owner::Detached => {}
            Owner::Pending => prune_pending(),
            Owner::Registry(registry) => {
                if let Some(registry) = registry.upgrade() {
                    registry.remove_dead(&self.name);
                }
            }
        }
    }
}

/// Name-ordered store of console items.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use appfw::core::{ConVar, ItemFilter, Registry};
///
/// let registry = Registry::new();
/// let fps = Arc::new(ConVar::new("fps_max", 300i32, "Frame rate limit"));
/// let name = Arc::new(ConVar::new("cl_name", String::from("player"), "Player name"));
/// registry.register_var(&fps);
/// registry.register_var(&name);
///
/// assert_eq!(registry.names(), ["cl_name", "fps_max"]);
/// assert!(registry.find("fps_max", ItemFilter::Vars).is_some());
///
/// drop(fps);
/// assert_eq!(registry.names(), ["cl_name"]);
/// ```
#[derive(Default)]
pub struct Registry {
    items: Mutex<BTreeMap<Box<str>, WeakItem>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add an item.
    ///
    /// Names must be unique. Registering a second item under a taken name is
    /// an assertion failure; if the assertion is ignored the existing item
    /// is kept and `false` is returned.
    pub fn register(self: &Arc<Self>, item: ConItem) -> bool {
        let inserted = {
            let mut items = lock(&self.items);
            match items.get(item.name()) {
                Some(existing) if !existing.is_dead() => false,
                _ => {
                    items.insert(item.name().into(), item.downgrade());
                    item.header().set_owner(Owner::Registry(Arc::downgrade(self)));
                    true
                }
            }
        };

        crate::afw_assert_rel!(inserted, "console item '{}' is already registered", item.name());
        inserted
    }

    pub fn register_var<T: ConVarValue>(self: &Arc<Self>, var: &Arc<ConVar<T>>) -> bool {
        self.register(ConItem::Var(var.clone()))
    }

    pub fn register_cmd(self: &Arc<Self>, cmd: &Arc<ConCommand>) -> bool {
        self.register(ConItem::Cmd(cmd.clone()))
    }

    /// Remove an item. Returns `false` if this exact item was not registered.
    pub fn unregister(&self, item: &ConItem) -> bool {
        let removed = {
            let mut items = lock(&self.items);
            let matches = items
                .get(item.name())
                .is_some_and(|registered| registered.points_to(item));
            if matches {
                items.remove(item.name());
            }
            matches
        };

        if removed {
            item.header().set_owner(Owner::Detached);
        }
        removed
    }

    /// Find an item by name.
    pub fn find(&self, name: &str, filter: ItemFilter) -> Option<ConItem> {
        // The upgraded item may be the last strong reference. It must not be
        // dropped while `items` is locked, since its drop locks `items`.
        let item = lock(&self.items).get(name).and_then(WeakItem::upgrade)?;
        filter.matches(item.kind()).then_some(item)
    }

    pub fn find_var(&self, name: &str) -> Option<Arc<dyn ConVarDyn>> {
        match self.find(name, ItemFilter::Vars)? {
            ConItem::Var(var) => Some(var),
            ConItem::Cmd(_) => None,
        }
    }

    pub fn find_cmd(&self, name: &str) -> Option<Arc<ConCommand>> {
        match self.find(name, ItemFilter::Cmds)? {
            ConItem::Cmd(cmd) => Some(cmd),
            ConItem::Var(_) => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name, ItemFilter::All).is_some()
    }

    /// Snapshot of all names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        lock(&self.items)
            .iter()
            .filter(|(_, item)| !item.is_dead())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Snapshot of the matching items in lexicographic order.
    pub fn items(&self, filter: ItemFilter) -> Vec<ConItem> {
        let live: Vec<ConItem> = lock(&self.items).values().filter_map(WeakItem::upgrade).collect();
        live.into_iter().filter(|item| filter.matches(item.kind())).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).values().filter(|item| !item.is_dead()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove_dead(&self, name: &str) {
        let mut items = lock(&self.items);
        if items.get(name).is_some_and(WeakItem::is_dead) {
            items.remove(name);
        }
    }
}

// ---------------------------------------------------------------------------
// Pending items
// ---------------------------------------------------------------------------

struct PendingState {
    items: Vec<(Box<str>, WeakItem)>,
    /// Registry of the hub that adopted the pending set, if it is alive.
    live: Weak<Registry>,
}

static PENDING: Mutex<PendingState> = Mutex::new(PendingState {
    items: Vec::new(),
    live: Weak::new(),
});

/// Register with the adopting hub, or stage until one exists.
pub(crate) fn declare(item: ConItem) {
    let mut pending = lock(&PENDING);

    if let Some(registry) = pending.live.upgrade() {
        drop(pending);
        registry.register(item);
        return;
    }

    let duplicate = pending
        .items
        .iter()
        .any(|(name, staged)| **name == *item.name() && !staged.is_dead());

    if !duplicate {
        item.header().set_owner(Owner::Pending);
        pending.items.push((item.name().into(), item.downgrade()));
    }
    drop(pending);

    crate::afw_assert_rel!(!duplicate, "console item '{}' is already declared", item.name());
}

/// Move every staged item into `registry` and route later declarations to it.
pub(crate) fn adopt_pending(registry: &Arc<Registry>) {
    let (staged, taken) = {
        let mut pending = lock(&PENDING);
        if pending.live.strong_count() > 0 {
            (Vec::new(), true)
        } else {
            pending.live = Arc::downgrade(registry);
            (std::mem::take(&mut pending.items), false)
        }
    };

    crate::afw_assert_rel!(!taken, "another console hub already owns the declared items");

    for item in staged.iter().filter_map(|(_, item)| item.upgrade()) {
        registry.register(item);
    }
}

/// Stage every live item of `registry` again so the next adopting hub picks
/// it up.
pub(crate) fn release_to_pending(registry: &Arc<Registry>) {
    let items = std::mem::take(&mut *lock(&registry.items));
    let live: Vec<ConItem> = items.values().filter_map(WeakItem::upgrade).collect();

    {
        let mut pending = lock(&PENDING);
        if Weak::ptr_eq(&pending.live, &Arc::downgrade(registry)) {
            pending.live = Weak::new();
        }

        for item in &live {
            item.header().set_owner(Owner::Pending);
            pending.items.push((item.name().into(), item.downgrade()));
        }
    }

    // Dropping the last strong reference here detaches the item, which
    // needs the pending lock.
    drop(live);
}

fn prune_pending() {
    lock(&PENDING).items.retain(|(_, item)| !item.is_dead());
}

/// Names of the staged items, unordered.
pub fn pending_names() -> Vec<String> {
    lock(&PENDING)
        .items
        .iter()
        .filter(|(_, item)| !item.is_dead())
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use serial_test::serial;

    use super::*;
    use crate::dbg::{self, AssertAction};

    #[test]
    fn test_registry_var() {
        let registry = Registry::new();
        let var = Arc::new(ConVar::new("sv_gravity", 800.0f32, "World gravity"));
        assert!(registry.register_var(&var));

        let found = registry.find_var("sv_gravity").map(|v| v.get_string());
        assert_eq!(found.as_deref(), Some("800"));
        assert!(registry.find_cmd("sv_gravity").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_cmd() {
        let registry = Registry::new();
        let cmd = ConCommand::no_args("quit", "Exit", |_| {});
        assert!(registry.register_cmd(&cmd));

        let item = registry.find("quit", ItemFilter::All);
        assert!(item.as_ref().is_some_and(ConItem::is_cmd));
        assert!(registry.find("quit", ItemFilter::Vars).is_none());
    }

    #[test]
    fn test_names_sorted() {
        let registry = Registry::new();
        let vars: Vec<_> = ["zeta", "alpha", "mid", "beta_2", "beta_10"]
            .into_iter()
            .map(|n| Arc::new(ConVar::new(n, 0i32, "")))
            .collect();
        for var in &vars {
            registry.register_var(var);
        }

        let names = registry.names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names, ["alpha", "beta_10", "beta_2", "mid", "zeta"]);
    }

    #[test]
    fn test_items_filter() {
        let registry = Registry::new();
        let var = Arc::new(ConVar::new("b_var", true, ""));
        let cmd = ConCommand::no_args("a_cmd", "", |_| {});
        registry.register_var(&var);
        registry.register_cmd(&cmd);

        let names = |filter| {
            registry
                .items(filter)
                .iter()
                .map(|i| i.name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(ItemFilter::All), ["a_cmd", "b_var"]);
        assert_eq!(names(ItemFilter::Vars), ["b_var"]);
        assert_eq!(names(ItemFilter::Cmds), ["a_cmd"]);
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = Registry::new();
        let var = Arc::new(ConVar::new("temp", 1i32, ""));
        registry.register_var(&var);
        assert!(registry.contains("temp"));

        drop(var);
        assert!(!registry.contains("temp"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_racing_item_drop() {
        let registry = Registry::new();
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();

        let lookups = {
            let registry = registry.clone();
            let stop = stop.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    // A var looked up as a command is dropped right away.
                    let _ = registry.find("racy", ItemFilter::Cmds);
                    let _ = registry.items(ItemFilter::Cmds);
                }
                let _ = done_tx.send("lookups");
            })
        };

        let drops = {
            let registry = registry.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                for _ in 0..20_000 {
                    // The lookup thread may still hold the previous one.
                    while registry.contains("racy") {
                        thread::yield_now();
                    }
                    let var = Arc::new(ConVar::new("racy", 1i32, ""));
                    registry.register_var(&var);
                    drop(var);
                }
                stop.store(true, Ordering::Release);
                let _ = done_tx.send("drops");
            })
        };

        for _ in 0..2 {
            let finished = done_rx.recv_timeout(Duration::from_secs(30));
            assert!(finished.is_ok(), "registry lock was re-entered from an item drop");
        }
        lookups.join().unwrap();
        drops.join().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister() {
        let registry = Registry::new();
        let var = Arc::new(ConVar::new("temp", 1i32, ""));
        let item = ConItem::from(var.clone());
        registry.register(item.clone());

        let other = ConItem::from(Arc::new(ConVar::new("temp", 2i32, "")));
        assert!(!registry.unregister(&other));
        assert!(registry.unregister(&item));
        assert!(!registry.contains("temp"));

        // Detached items drop without touching the registry.
        drop(item);
        drop(var);
    }

    #[test]
    #[serial]
    fn test_duplicate_detection() {
        dbg::set_assert_callback(|_| AssertAction::Ignore);

        let registry = Registry::new();
        let first = Arc::new(ConVar::new("dup", 1i32, ""));
        let second = Arc::new(ConVar::new("dup", 2i32, ""));
        assert!(registry.register_var(&first));
        assert!(!registry.register_var(&second));

        dbg::reset_assert_callback();

        let kept = registry.find_var("dup").map(|v| v.get_string());
        assert_eq!(kept.as_deref(), Some("1"));

        // Dropping the rejected item must not evict the registered one.
        drop(second);
        assert!(registry.contains("dup"));
    }

    #[test]
    #[serial]
    fn test_pending_adopt_and_release() {
        let var = ConVar::declare("test_pending_var", 3i32, "");
        assert!(pending_names().contains(&"test_pending_var".to_string()));

        let registry = Registry::new();
        adopt_pending(&registry);
        assert!(registry.contains("test_pending_var"));
        assert!(!pending_names().contains(&"test_pending_var".to_string()));

        // Declarations after adoption go straight to the live registry.
        let cmd = ConCommand::declare("test_pending_cmd", "", |_, _| {});
        assert!(registry.contains("test_pending_cmd"));

        release_to_pending(&registry);
        assert!(registry.is_empty());
        let staged = pending_names();
        assert!(staged.contains(&"test_pending_var".to_string()));
        assert!(staged.contains(&"test_pending_cmd".to_string()));

        drop(var);
        drop(cmd);
        let staged = pending_names();
        assert!(!staged.contains(&"test_pending_var".to_string()));
        assert!(!staged.contains(&"test_pending_cmd".to_string()));
    }
}
