//! A mapping-backed set of string keys.
//!
//! Item ids, property values and evaluation results all travel through the
//! engine as [`Set`]s. Keys are plain strings (numbers are kept in their
//! canonical text form, see [`crate::datatype::format_number`]), so two
//! spellings of the same key always collide. Iteration order is unspecified;
//! use [`Set::to_sorted_vec`] when a stable order matters.

use core::hash::BuildHasherDefault;
use std::collections::HashSet;
use std::collections::hash_set;
use std::fmt;

use seahash::SeaHasher;

pub type KeyHasher = BuildHasherDefault<SeaHasher>;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Set {
    kept: HashSet<String, KeyHasher>,
}

impl Set {
    pub fn new() -> Self {
        Self { kept: HashSet::default() }
    }
    pub fn add<K: Into<String>>(&mut self, key: K) -> bool {
        self.kept.insert(key.into())
    }
    pub fn remove(&mut self, key: &str) -> bool {
        self.kept.remove(key)
    }
    pub fn add_set(&mut self, other: &Set) {
        for key in other.iter() {
            if !self.kept.contains(key) {
                self.kept.insert(key.to_owned());
            }
        }
    }
    pub fn remove_set(&mut self, other: &Set) {
        for key in other.iter() {
            self.kept.remove(key);
        }
    }
    /// In-place intersection.
    pub fn retain_set(&mut self, other: &Set) {
        self.kept.retain(|key| other.contains(key));
    }
    pub fn contains(&self, key: &str) -> bool {
        self.kept.contains(key)
    }
    pub fn size(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
    pub fn to_array(&self) -> Vec<String> {
        self.kept.iter().cloned().collect()
    }
    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut keys = self.to_array();
        keys.sort_unstable();
        keys
    }
    pub fn iter(&self) -> Iter<'_> {
        Iter { inner: self.kept.iter() }
    }
    /// Calls `f` on every key until it returns `true`.
    pub fn visit<F: FnMut(&str) -> bool>(&self, mut f: F) {
        for key in self.kept.iter() {
            if f(key) {
                break;
            }
        }
    }
    /// Intersects `a` and `b`, iterating the smaller of the two. When a
    /// result set is supplied the intersection is accumulated into it.
    pub fn create_intersection(a: &Set, b: &Set, result: Option<Set>) -> Set {
        let mut set = result.unwrap_or_default();
        let (small, large) = if a.size() < b.size() { (a, b) } else { (b, a) };
        for key in small.iter() {
            if large.contains(key) {
                set.add(key);
            }
        }
        set
    }
}

pub struct Iter<'a> {
    inner: hash_set::Iter<'a, String>,
}
impl<'a> Iterator for Iter<'a> {
    type Item = &'a str;
    fn next(&mut self) -> Option<&'a str> {
        self.inner.next().map(String::as_str)
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a> IntoIterator for &'a Set {
    type Item = &'a str;
    type IntoIter = Iter<'a>;
    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

impl<K: Into<String>> FromIterator<K> for Set {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut set = Set::new();
        set.extend(iter);
        set
    }
}

impl<K: Into<String>> Extend<K> for Set {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.kept.insert(key.into());
        }
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.to_sorted_vec()).finish()
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}", self.to_sorted_vec().join(", "))
    }
}
