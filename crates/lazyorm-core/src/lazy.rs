//! Lazy holders for values that are expensive to fetch.
//!
//! A [`Lazy`] starts out holding a loader. The first successful access
//! runs the loader and caches the value; every later access returns the
//! cached value without calling the loader again. [`LazyList`] is the
//! collection form used for one-to-many associations.

use crate::context::LoadContext;
use crate::entity::{Entity, EntityRef};
use crate::error::OrmError;
use crate::types::{EntityId, EntityKind};
use parking_lot::Mutex;
use std::fmt;
use std::sync::OnceLock;

/// Produces the value of a [`Lazy`]
pub type Loader<T> = Box<dyn Fn(&mut LoadContext<'_>) -> Result<T, OrmError> + Send + Sync>;

pub struct Lazy<T> {
    value: OnceLock<T>,
    /// Taken while the loader runs, so a nested access can be detected
    loader: Mutex<Option<Loader<T>>>,
}

impl<T> Lazy<T> {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn(&mut LoadContext<'_>) -> Result<T, OrmError> + Send + Sync + 'static,
    {
        Self {
            value: OnceLock::new(),
            loader: Mutex::new(Some(Box::new(loader))),
        }
    }

    /// A holder whose value is already known
    pub fn loaded(value: T) -> Self {
        Self {
            value: OnceLock::from(value),
            loader: Mutex::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }

    /// The cached value, if it has been loaded. Never runs the loader.
    pub fn get_loaded(&self) -> Option<&T> {
        self.value.get()
    }

    /// Return the value, running the loader on first access.
    ///
    /// A loader that fails is kept so the next access retries. An access
    /// made from inside the loader itself fails with
    /// [`OrmError::ReentrantLoad`].
    pub fn get(&self, cx: &mut LoadContext<'_>) -> Result<&T, OrmError> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }

        let loader = self.loader.lock().take();
        let Some(loader) = loader else {
            return Err(OrmError::ReentrantLoad("lazy value".to_string()));
        };

        match loader(cx) {
            Ok(value) => Ok(self.value.get_or_init(|| value)),
            Err(e) => {
                *self.loader.lock() = Some(loader);
                Err(e)
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(value) => f.debug_tuple("Lazy").field(value).finish(),
            None => f.write_str("Lazy(<unloaded>)"),
        }
    }
}

/// A lazily loaded list of entities.
///
/// Loading runs one query; every row becomes an entity through its
/// mapper, reusing instances already in the identity map.
pub struct LazyList<E: Entity> {
    inner: Lazy<Vec<EntityRef<E>>>,
}

impl<E: Entity> LazyList<E> {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn(&mut LoadContext<'_>) -> Result<Vec<EntityRef<E>>, OrmError> + Send + Sync + 'static,
    {
        Self {
            inner: Lazy::new(loader),
        }
    }

    pub fn loaded(items: Vec<EntityRef<E>>) -> Self {
        Self {
            inner: Lazy::loaded(items),
        }
    }

    pub fn empty() -> Self {
        Self::loaded(Vec::new())
    }

    /// Entities of type `E` owned by `owner`, fetched with the mapper's
    /// find-by-owner statement.
    ///
    /// The list holds whatever the store contains at first access, so
    /// entities created in the session show up only if they were committed
    /// before then. It must be read with the session that owns the entity
    /// holding the list: the loader resolves rows through the identity map
    /// of whatever context it is given, and caches those instances for good.
    pub fn owned_by(owner: EntityKind, owner_id: EntityId) -> Self {
        Self::new(move |cx| {
            let mapper = cx.registry().mapper::<E>()?;
            mapper.find_by_owner(cx, owner, owner_id)
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }

    pub fn get(&self, cx: &mut LoadContext<'_>) -> Result<&[EntityRef<E>], OrmError> {
        self.inner.get(cx).map(Vec::as_slice)
    }

    pub fn len(&self, cx: &mut LoadContext<'_>) -> Result<usize, OrmError> {
        self.get(cx).map(<[_]>::len)
    }

    pub fn is_empty(&self, cx: &mut LoadContext<'_>) -> Result<bool, OrmError> {
        self.get(cx).map(<[_]>::is_empty)
    }

    pub fn iter(
        &self,
        cx: &mut LoadContext<'_>,
    ) -> Result<std::slice::Iter<'_, EntityRef<E>>, OrmError> {
        self.get(cx).map(|items| items.iter())
    }

    /// Loaded items, without triggering a load
    pub fn get_loaded(&self) -> Option<&[EntityRef<E>]> {
        self.inner.get_loaded().map(Vec::as_slice)
    }
}

impl<E: Entity> fmt::Debug for LazyList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get_loaded() {
            Some(items) => f.debug_list().entries(items).finish(),
            None => write!(f, "LazyList<{}>(<unloaded>)", E::KIND),
        }
    }
}
