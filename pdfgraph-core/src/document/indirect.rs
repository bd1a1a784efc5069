//! Indirect object registry
//!
//! Maps object numbers to the objects of one document. Entries start out as
//! locators taken from the xref table and are parsed on first access; new
//! objects are registered in memory. Every entry records its generation, an
//! update flag used by incremental saves, and whether it is a virtual
//! placeholder created by [`IndirectObjects::get_or_create`].

use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId, NULL_OBJECT};
use crate::parser::{
    read_indirect_object, ByteSource, ObjectStream, ParseError, ParseOptions, ParseResult,
    ReferencePolicy, XRefEntry, XRefTable,
};
use crate::recovery::scan_object_headers;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::SeekFrom;

/// Generation given to the head of the free list
const FREE_HEAD_GENERATION: u16 = 65535;

/// Where an unparsed object lives in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Locator {
    Offset(u64),
    Compressed { stream_number: u32, index: u32 },
}

#[derive(Debug, Clone)]
enum EntryState {
    Unresolved(Locator),
    Resolved(Object),
    Free,
}

#[derive(Debug, Clone)]
struct Entry {
    generation: u16,
    state: EntryState,
    updated: bool,
    is_virtual: bool,
    /// Object and key path that reference a virtual entry
    holder: Option<(ObjectId, Vec<String>)>,
}

impl Entry {
    fn free(generation: u16) -> Self {
        Self {
            generation,
            state: EntryState::Free,
            updated: false,
            is_virtual: false,
            holder: None,
        }
    }

    fn unresolved(generation: u16, locator: Locator) -> Self {
        Self {
            generation,
            state: EntryState::Unresolved(locator),
            ..Self::free(generation)
        }
    }
}

/// Registry of the indirect objects of one document.
pub struct IndirectObjects {
    /// Keyed by object number; absent numbers were never defined
    entries: BTreeMap<u32, Entry>,
    source: Option<Box<dyn ByteSource>>,
    object_streams: HashMap<u32, ObjectStream>,
    /// Numbers currently being loaded, for cycle detection
    loading: HashSet<u32>,
    /// Header offsets from a full scan, built on the first failed load
    relocations: Option<HashMap<u32, u64>>,
    options: ParseOptions,
}

impl std::fmt::Debug for IndirectObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndirectObjects")
            .field("entries", &self.entries.len())
            .field("has_source", &self.source.is_some())
            .field("object_streams", &self.object_streams.len())
            .finish()
    }
}

impl Default for IndirectObjects {
    fn default() -> Self {
        Self::new(ParseOptions::default())
    }
}

impl IndirectObjects {
    /// Empty registry for a document built in memory.
    pub fn new(options: ParseOptions) -> Self {
        Self {
            entries: BTreeMap::from([(0, Entry::free(FREE_HEAD_GENERATION))]),
            source: None,
            object_streams: HashMap::new(),
            loading: HashSet::new(),
            relocations: None,
            options,
        }
    }

    /// Registry backed by `source`, with one unresolved entry per xref entry.
    pub fn from_xref(table: &XRefTable, source: Box<dyn ByteSource>, options: ParseOptions) -> Self {
        let mut registry = Self::new(options);
        registry.source = Some(source);

        for (number, entry) in table.iter() {
            let entry = match *entry {
                XRefEntry::Free { generation, .. } => Entry::free(generation),
                XRefEntry::InUse { offset, generation } => {
                    Entry::unresolved(generation, Locator::Offset(offset))
                }
                XRefEntry::Compressed {
                    stream_number,
                    index,
                } => Entry::unresolved(
                    0,
                    Locator::Compressed {
                        stream_number,
                        index,
                    },
                ),
            };
            registry.entries.insert(number, entry);
        }
        registry
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// One past the highest object number in use or freed
    pub fn size(&self) -> u32 {
        self.entries.keys().next_back().map_or(1, |last| last + 1)
    }

    /// Adds `object` as a new indirect object and returns its reference.
    ///
    /// Numbers are never reused; the new entry is flagged as updated.
    pub fn register(&mut self, object: impl Into<Object>) -> ObjectId {
        let id = ObjectId::new(self.size(), 0);
        let mut object = object.into();
        object.bind_parent(id);
        self.entries.insert(
            id.number(),
            Entry {
                generation: 0,
                state: EntryState::Resolved(object),
                updated: true,
                is_virtual: false,
                holder: None,
            },
        );
        tracing::trace!(object = %id, "registered");
        id
    }

    /// Marks the entry free and bumps its generation. Old references then resolve to null.
    pub fn unregister(&mut self, id: ObjectId) -> bool {
        if id.number() == 0 {
            return false;
        }
        match self.entry_mut(id) {
            Some(entry) if !matches!(entry.state, EntryState::Free) => {
                entry.state = EntryState::Free;
                entry.generation = entry.generation.saturating_add(1);
                entry.updated = true;
                entry.is_virtual = false;
                entry.holder = None;
                tracing::trace!(object = %id, "unregistered");
                true
            }
            _ => false,
        }
    }

    /// Resolves `id`, loading it from the source on first access.
    ///
    /// Never fails: free, unknown, out-of-range and unreadable objects all
    /// resolve to null. Repeated calls return the same cached object.
    /// Unreadable objects are not cached, so [`try_resolve`](Self::try_resolve)
    /// still reports their error later.
    pub fn resolve(&mut self, id: ObjectId) -> &Object {
        if let Err(err) = self.load(id.number()) {
            tracing::warn!(object = %id, error = %err, "unreadable object resolves to null");
        }
        self.loaded(id).unwrap_or(&NULL_OBJECT)
    }

    /// Resolution that honours [`ReferencePolicy`] and reports load failures.
    ///
    /// Free entries resolve to null under both policies; dangling references
    /// and generation mismatches are errors only under the strict policy.
    pub fn try_resolve(&mut self, id: ObjectId) -> ParseResult<&Object> {
        let strict = self.options.reference_policy == ReferencePolicy::Strict;
        let dangling = || ParseError::InvalidReference(id.number(), id.generation());

        let generation = match self.entries.get(&id.number()) {
            Some(entry) => entry.generation,
            _ if strict => return Err(dangling()),
            _ => return Ok(&NULL_OBJECT),
        };
        if self.is_free(id) {
            return Ok(&NULL_OBJECT);
        }
        if generation != id.generation() {
            if strict {
                return Err(dangling());
            }
            return Ok(&NULL_OBJECT);
        }

        self.load(id.number())?;
        Ok(self.loaded(id).unwrap_or(&NULL_OBJECT))
    }

    /// Resolves `object` if it is a reference, otherwise returns it unchanged.
    pub fn resolve_value<'a>(&'a mut self, object: &'a Object) -> &'a Object {
        match object {
            Object::Reference(id) => self.resolve(*id),
            other => other,
        }
    }

    /// Follows objects whose whole value is another reference.
    ///
    /// Stops at the first non-reference value or when a reference repeats.
    pub fn resolve_chain(&mut self, id: ObjectId) -> &Object {
        let mut current = id;
        let mut visited = HashSet::new();
        visited.insert(current);
        while let Object::Reference(next) = *self.resolve(current) {
            if !visited.insert(next) {
                tracing::warn!(object = %id, at = %next, "reference chain loops");
                return &NULL_OBJECT;
            }
            current = next;
        }
        self.resolve(current)
    }

    /// Already-loaded object for `id`, without touching the source.
    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.loaded(id)
    }

    /// Mutable access; the entry is flagged as updated.
    ///
    /// A virtual placeholder becomes a real object here, and so does the
    /// chain of holders that reference it.
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        if let Err(err) = self.load(id.number()) {
            tracing::warn!(object = %id, error = %err, "cannot load object for update");
            return None;
        }
        if self.loaded(id).is_none() {
            return None;
        }
        self.realize(id);

        let entry = self.entry_mut(id)?;
        entry.updated = true;
        match &mut entry.state {
            EntryState::Resolved(object) => Some(object),
            _ => None,
        }
    }

    /// Replaces the value of an existing object.
    pub fn update(&mut self, id: ObjectId, object: impl Into<Object>) -> Result<()> {
        let mut object = object.into();
        object.bind_parent(id);
        if self.is_free(id) || self.entry_mut(id).is_none() {
            return Err(PdfError::InvalidObjectReference(id.number(), id.generation()));
        }
        self.realize(id);
        if let Some(entry) = self.entry_mut(id) {
            entry.state = EntryState::Resolved(object);
            entry.updated = true;
        }
        Ok(())
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entry(id)
            .is_some_and(|entry| !matches!(entry.state, EntryState::Free))
    }

    /// Free entries, and numbers that were never defined
    pub fn is_free(&self, id: ObjectId) -> bool {
        match self.entries.get(&id.number()) {
            Some(entry) => matches!(entry.state, EntryState::Free),
            _ => true,
        }
    }

    pub fn is_virtual(&self, id: ObjectId) -> bool {
        self.entry(id).is_some_and(|entry| entry.is_virtual)
    }

    /// Changed since load or the last save, including nested containers.
    pub fn is_updated(&self, id: ObjectId) -> bool {
        self.entry(id).is_some_and(Self::entry_updated)
    }

    /// Every changed or freed entry that must go into an incremental update
    pub fn updated_ids(&self) -> Vec<ObjectId> {
        self.numbered()
            .filter(|(_, entry)| !entry.is_virtual && Self::entry_updated(entry))
            .map(|(number, entry)| ObjectId::new(number, entry.generation))
            .collect()
    }

    /// Ids of all live, non-virtual objects in number order
    pub fn ids(&self) -> Vec<ObjectId> {
        self.numbered()
            .filter(|(number, entry)| {
                *number != 0 && !entry.is_virtual && !matches!(entry.state, EntryState::Free)
            })
            .map(|(number, entry)| ObjectId::new(number, entry.generation))
            .collect()
    }

    /// Free entries as `(number, next generation)` in number order, excluding 0
    pub fn free_ids(&self) -> Vec<ObjectId> {
        self.numbered()
            .filter(|(number, entry)| *number != 0 && matches!(entry.state, EntryState::Free))
            .map(|(number, entry)| ObjectId::new(number, entry.generation))
            .collect()
    }

    /// Loads every unresolved entry, so the source is no longer needed.
    pub fn load_all(&mut self) {
        for id in self.ids() {
            self.resolve(id);
        }
    }

    /// Virtual placeholders, which are never written
    pub fn virtual_ids(&self) -> Vec<ObjectId> {
        self.numbered()
            .filter(|(_, entry)| entry.is_virtual)
            .map(|(number, entry)| ObjectId::new(number, entry.generation))
            .collect()
    }

    /// Whole content of the backing source, if there is one.
    pub(crate) fn read_source(&mut self) -> ParseResult<Option<Vec<u8>>> {
        let Some(source) = self.source.as_deref_mut() else {
            return Ok(None);
        };
        source.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        Ok(Some(data))
    }

    /// Clears update flags, e.g. once the changes were persisted.
    pub fn mark_saved(&mut self) {
        for entry in self.entries.values_mut() {
            entry.updated = false;
            if let EntryState::Resolved(object) = &mut entry.state {
                object.clear_updated();
            }
        }
    }

    /// Returns the object that holds the value at `path` below `holder`,
    /// creating it from `default` when absent.
    ///
    /// Intermediate keys that are missing get virtual empty dictionaries.
    /// With `direct`, a new value is stored inline, flagged virtual, and the
    /// returned id is the indirect object containing it. Otherwise the value
    /// gets its own virtual indirect object, and an existing inline value is
    /// promoted to one. Placeholders are never written until they are
    /// modified through [`get_mut`](Self::get_mut) or their container is.
    pub fn get_or_create(
        &mut self,
        holder: ObjectId,
        path: &[&str],
        direct: bool,
        default: impl FnOnce() -> Object,
    ) -> Result<ObjectId> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| PdfError::InvalidStructure("empty key path".to_string()))?;

        let mut owner = holder;
        let mut inner: Vec<String> = Vec::new();
        for key in parents {
            let dict = self.dict_at(owner, &inner)?;
            match dict.get_mut_quiet(key) {
                Some(Object::Reference(id)) => {
                    owner = *id;
                    inner.clear();
                    continue;
                }
                Some(Object::Dictionary(_)) => {}
                Some(other) => {
                    return Err(PdfError::InvalidObjectType {
                        expected: "Dictionary".to_string(),
                        found: other.type_name().to_string(),
                    })
                }
                None => {
                    let mut placeholder = Dictionary::new();
                    placeholder.set_virtual(true);
                    placeholder.set_parent(Some(owner));
                    dict.insert_quiet(*key, Object::Dictionary(placeholder));
                }
            }
            inner.push(key.to_string());
        }

        let dict = self.dict_at(owner, &inner)?;
        match dict.get(last) {
            Some(Object::Reference(id)) => Ok(*id),
            Some(_) if direct => Ok(owner),
            Some(_) => {
                let value = dict.remove(last).unwrap_or_default();
                let id = self.register(value);
                tracing::debug!(object = %id, key = %last, "promoted inline value to indirect object");
                let dict = self.dict_at(owner, &inner)?;
                dict.set(*last, id);
                if let Some(entry) = self.entry_mut(owner) {
                    entry.updated = true;
                }
                Ok(id)
            }
            None if direct => {
                let mut value = default();
                mark_virtual(&mut value);
                value.bind_parent(owner);
                dict.insert_quiet(*last, value);
                Ok(owner)
            }
            None => {
                let mut path: Vec<String> = inner.clone();
                path.push(last.to_string());
                let id = self.register_virtual(default(), owner, path);
                let dict = self.dict_at(owner, &inner)?;
                dict.insert_quiet(*last, Object::Reference(id));
                Ok(id)
            }
        }
    }

    fn register_virtual(&mut self, object: Object, holder: ObjectId, path: Vec<String>) -> ObjectId {
        let id = self.register(object);
        if let Some(entry) = self.entry_mut(id) {
            entry.updated = false;
            entry.is_virtual = true;
            entry.holder = Some((holder, path));
        }
        id
    }

    /// Turns a virtual entry and every virtual holder above it into real objects.
    fn realize(&mut self, id: ObjectId) {
        let mut current = id;
        loop {
            let Some(entry) = self.entry_mut(current) else {
                return;
            };
            if !entry.is_virtual {
                return;
            }
            entry.is_virtual = false;
            entry.updated = true;
            let Some((holder, path)) = entry.holder.take() else {
                return;
            };
            tracing::trace!(object = %current, holder = %holder, "virtual object realized");

            if let Some(entry) = self.entry_mut(holder) {
                entry.updated = true;
                if let EntryState::Resolved(object) = &mut entry.state {
                    // Direct dictionaries on the way to the reference become real too
                    let inner = &path[..path.len().saturating_sub(1)];
                    unvirtualize_path(object, inner);
                }
            }
            current = holder;
        }
    }

    /// Dictionary at `path` inside the loaded object `owner`, without flagging anything.
    fn dict_at(&mut self, owner: ObjectId, path: &[String]) -> Result<&mut Dictionary> {
        self.load(owner.number())?;
        let not_dict = |found: &str| PdfError::InvalidObjectType {
            expected: "Dictionary".to_string(),
            found: found.to_string(),
        };

        let object = match self.entry_mut(owner).map(|entry| &mut entry.state) {
            Some(EntryState::Resolved(object)) => object,
            _ => return Err(PdfError::InvalidObjectReference(owner.number(), owner.generation())),
        };
        let mut dict = match object {
            Object::Dictionary(dict) => dict,
            Object::Stream(stream) => stream.dict_mut_untracked(),
            other => return Err(not_dict(other.type_name())),
        };
        for key in path {
            dict = match dict.get_mut_quiet(key) {
                Some(Object::Dictionary(child)) => child,
                Some(other) => return Err(not_dict(other.type_name())),
                None => return Err(not_dict("Null")),
            };
        }
        Ok(dict)
    }

    fn entry(&self, id: ObjectId) -> Option<&Entry> {
        self.entries
            .get(&id.number())
            .filter(|entry| entry.generation == id.generation())
    }

    fn entry_mut(&mut self, id: ObjectId) -> Option<&mut Entry> {
        self.entries
            .get_mut(&id.number())
            .filter(|entry| entry.generation == id.generation())
    }

    fn loaded(&self, id: ObjectId) -> Option<&Object> {
        match &self.entry(id)?.state {
            EntryState::Resolved(object) => Some(object),
            _ => None,
        }
    }

    fn numbered(&self) -> impl Iterator<Item = (u32, &Entry)> {
        self.entries.iter().map(|(number, entry)| (*number, entry))
    }

    fn entry_updated(entry: &Entry) -> bool {
        entry.updated
            || matches!(&entry.state, EntryState::Resolved(object) if object.has_updates())
    }

    /// Parses an unresolved entry and caches the result.
    fn load(&mut self, number: u32) -> ParseResult<()> {
        let (generation, locator) = match self.entries.get(&number) {
            Some(Entry {
                generation,
                state: EntryState::Unresolved(locator),
                ..
            }) => (*generation, *locator),
            _ => return Ok(()),
        };

        if !self.loading.insert(number) {
            return Err(ParseError::CircularReference(number));
        }
        let result = self.read_object(number, locator);
        self.loading.remove(&number);

        let mut object = match result {
            Ok(object) => object,
            Err(err) => match locator {
                Locator::Offset(offset) if self.options.lenient_syntax => {
                    self.read_relocated(number, offset).ok_or(err)?
                }
                _ => return Err(err),
            },
        };

        let id = ObjectId::new(number, generation);
        object.bind_parent(id);
        if let Some(entry) = self.entries.get_mut(&number) {
            entry.state = EntryState::Resolved(object);
        }
        tracing::trace!(object = %id, "resolved");
        Ok(())
    }

    fn read_object(&mut self, number: u32, locator: Locator) -> ParseResult<Object> {
        match locator {
            Locator::Offset(offset) => self.read_at(number, offset),
            Locator::Compressed {
                stream_number,
                index,
            } => self.read_compressed(number, stream_number, index),
        }
    }

    fn read_at(&mut self, number: u32, offset: u64) -> ParseResult<Object> {
        let source = self
            .source
            .as_deref_mut()
            .ok_or(ParseError::InvalidReference(number, 0))?;
        let (id, object) = read_indirect_object(source, offset, &self.options)?;
        if id.number() != number {
            return Err(ParseError::SyntaxError {
                position: offset,
                message: format!("expected object {number}, found {id}"),
            });
        }
        Ok(object)
    }

    /// Retries a failed load at the offset a full header scan reports.
    fn read_relocated(&mut self, number: u32, failed_offset: u64) -> Option<Object> {
        if self.relocations.is_none() {
            self.relocations = Some(self.scan_headers().unwrap_or_default());
        }
        let offset = *self.relocations.as_ref()?.get(&number)?;
        if offset == failed_offset {
            return None;
        }
        tracing::warn!(object = number, from = failed_offset, to = offset, "relocating object");
        self.read_at(number, offset).ok()
    }

    fn scan_headers(&mut self) -> ParseResult<HashMap<u32, u64>> {
        let Some(source) = self.source.as_deref_mut() else {
            return Ok(HashMap::new());
        };
        source.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        Ok(scan_object_headers(&data)
            .into_iter()
            .map(|header| (header.id.number(), header.offset))
            .collect())
    }

    fn read_compressed(&mut self, number: u32, stream_number: u32, index: u32) -> ParseResult<Object> {
        if !self.object_streams.contains_key(&stream_number) {
            self.load(stream_number)?;
            let container = match self.entries.get(&stream_number) {
                Some(Entry {
                    state: EntryState::Resolved(Object::Stream(stream)),
                    ..
                }) => ObjectStream::parse(stream, &self.options)?,
                _ => {
                    return Err(ParseError::ObjectStreamError(format!(
                        "object {stream_number} is not an object stream"
                    )))
                }
            };
            self.object_streams.insert(stream_number, container);
        }

        let container = self.object_streams.get(&stream_number).ok_or_else(|| {
            ParseError::ObjectStreamError(format!("object stream {stream_number} unavailable"))
        })?;
        let index = index as usize;
        let index = match container.object_numbers().nth(index) {
            Some(found) if found == number => index,
            _ => container.index_of(number).unwrap_or(index),
        };
        let (_, object) = container.object_at(index, Some(number), &self.options)?;
        Ok(object)
    }
}

fn unvirtualize_path(object: &mut Object, path: &[String]) {
    let mut dict = match object {
        Object::Dictionary(dict) => dict,
        Object::Stream(stream) => stream.dict_mut_untracked(),
        _ => return,
    };
    for key in path {
        match dict.get_mut_quiet(key) {
            Some(Object::Dictionary(child)) => {
                child.set_virtual(false);
                dict = child;
            }
            _ => return,
        }
    }
}

fn mark_virtual(object: &mut Object) {
    match object {
        Object::Dictionary(dict) => dict.set_virtual(true),
        Object::Array(arr) => arr.set_virtual(true),
        _ => {}
    }
}
