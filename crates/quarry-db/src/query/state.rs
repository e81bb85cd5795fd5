//! Accumulated clause state and the cache snapshot.

use indexmap::IndexMap;

use super::types::Connector;

/// One condition plus the connector chosen when it was added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fragment {
    pub(crate) connector: Option<Connector>,
    pub(crate) text: String,
}

/// A select column, protected at compile time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectItem {
    pub(crate) text: String,
    /// Quote override for this column
    pub(crate) escape: Option<bool>,
}

/// One list per clause kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ClauseLists {
    pub(crate) select: Vec<SelectItem>,
    pub(crate) from: Vec<String>,
    pub(crate) join: Vec<String>,
    pub(crate) where_: Vec<Fragment>,
    pub(crate) like: Vec<Fragment>,
    pub(crate) group_by: Vec<String>,
    pub(crate) having: Vec<Fragment>,
    pub(crate) order_by: Vec<String>,
    /// Protected column to escaped value
    pub(crate) set: IndexMap<String, String>,
    pub(crate) aliases: Vec<String>,
}

/// Cache entries first, then live ones, keeping the first of any duplicate.
fn merged<T: Clone + PartialEq>(cache: &[T], live: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(cache.len() + live.len());
    for item in cache.iter().chain(live) {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

impl ClauseLists {
    fn merge_from(&mut self, cache: &ClauseLists) {
        self.select = merged(&cache.select, &self.select);
        self.from = merged(&cache.from, &self.from);
        self.join = merged(&cache.join, &self.join);
        self.where_ = merged(&cache.where_, &self.where_);
        self.like = merged(&cache.like, &self.like);
        self.group_by = merged(&cache.group_by, &self.group_by);
        self.having = merged(&cache.having, &self.having);
        self.order_by = merged(&cache.order_by, &self.order_by);
        self.aliases = merged(&cache.aliases, &self.aliases);

        let mut set = cache.set.clone();
        for (k, v) in &self.set {
            set.insert(k.clone(), v.clone());
        }
        self.set = set;
    }
}

/// Clause state of one connection's query builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuilderState {
    pub(crate) live: ClauseLists,
    pub(crate) cache: ClauseLists,
    /// New clauses are also recorded into the cache
    pub(crate) caching: bool,
    pub(crate) distinct: bool,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    /// Rows for the next batch write: protected column to escaped value
    pub(crate) batch: Vec<Vec<(String, String)>>,
    pub(crate) batch_index: Option<String>,
}

macro_rules! record {
    ($state:expr, $field:ident, $item:expr) => {{
        let item = $item;
        if $state.caching {
            $state.cache.$field.push(item.clone());
        }
        $state.live.$field.push(item);
    }};
}

impl BuilderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while clauses are also recorded into the cache.
    pub fn is_caching(&self) -> bool {
        self.caching
    }

    /// Connector for a new condition: none when it will be the first.
    fn connector(live: &[Fragment], cache: &[Fragment], connector: Connector) -> Option<Connector> {
        if live.is_empty() && cache.is_empty() {
            None
        } else {
            Some(connector)
        }
    }

    pub(crate) fn add_select(&mut self, item: SelectItem) {
        record!(self, select, item);
    }

    pub(crate) fn add_from(&mut self, table: String) {
        record!(self, from, table);
    }

    pub(crate) fn add_join(&mut self, join: String) {
        record!(self, join, join);
    }

    pub(crate) fn add_group_by(&mut self, column: String) {
        record!(self, group_by, column);
    }

    pub(crate) fn add_order_by(&mut self, order: String) {
        record!(self, order_by, order);
    }

    pub(crate) fn add_alias(&mut self, alias: String) {
        if !self.live.aliases.contains(&alias) {
            self.live.aliases.push(alias.clone());
        }
        if self.caching && !self.cache.aliases.contains(&alias) {
            self.cache.aliases.push(alias);
        }
    }

    pub(crate) fn add_where(&mut self, connector: Connector, text: String) {
        let connector = Self::connector(&self.live.where_, &self.cache.where_, connector);
        record!(self, where_, Fragment { connector, text });
    }

    pub(crate) fn add_like(&mut self, connector: Connector, text: String) {
        let connector = Self::connector(&self.live.like, &self.cache.like, connector);
        record!(self, like, Fragment { connector, text });
    }

    pub(crate) fn add_having(&mut self, connector: Connector, text: String) {
        let connector = Self::connector(&self.live.having, &self.cache.having, connector);
        record!(self, having, Fragment { connector, text });
    }

    pub(crate) fn add_set(&mut self, key: String, value: String) {
        if self.caching {
            self.cache.set.insert(key.clone(), value.clone());
        }
        self.live.set.insert(key, value);
    }

    /// Every alias known to live or cached clauses.
    pub(crate) fn aliases(&self) -> Vec<String> {
        merged(&self.cache.aliases, &self.live.aliases)
    }

    /// Folds the cache snapshot into the live lists.
    pub(crate) fn merge_cache(&mut self) {
        let cache = &self.cache;
        if cache == &ClauseLists::default() {
            return;
        }
        self.live.merge_from(cache);
    }

    pub(crate) fn start_cache(&mut self) {
        self.caching = true;
    }

    pub(crate) fn stop_cache(&mut self) {
        self.caching = false;
    }

    pub(crate) fn flush_cache(&mut self) {
        self.cache = ClauseLists::default();
    }

    /// Clears what a read consumed.
    pub(crate) fn reset_select(&mut self) {
        let live = &mut self.live;
        live.select.clear();
        live.from.clear();
        live.join.clear();
        live.where_.clear();
        live.like.clear();
        live.group_by.clear();
        live.having.clear();
        live.order_by.clear();
        live.aliases.clear();
        self.distinct = false;
        self.limit = None;
        self.offset = None;
    }

    /// Clears what a write consumed.
    pub(crate) fn reset_write(&mut self) {
        let live = &mut self.live;
        live.set.clear();
        live.from.clear();
        live.where_.clear();
        live.like.clear();
        live.order_by.clear();
        self.batch.clear();
        self.batch_index = None;
        self.limit = None;
        self.offset = None;
    }
}
