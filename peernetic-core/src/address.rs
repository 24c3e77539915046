//! Hierarchical addresses used for routing between actors and gateways.
//!
//! An [`Address`] is an ordered sequence of non-empty string elements,
//! written `elem0:elem1:...` in text form. The first element selects a
//! shuttle (a host or gateway); the remaining elements are interpreted by
//! whatever lives behind it (an actor id, a subcoroutine suffix, a timer
//! delay, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by address construction and prefix arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// An address string or element list contained an empty element.
    #[error("malformed address: empty element in {0:?}")]
    MalformedAddress(String),
    /// `remove_prefix` was called with an address that is not a prefix.
    #[error("{prefix} is not a prefix of {address}")]
    NotAPrefix {
        /// The address that was expected to be a prefix.
        prefix: String,
        /// The address the prefix was removed from.
        address: String,
    },
}

/// Immutable hierarchical identifier.
///
/// Equality, ordering and hashing are element-wise, so addresses are usable
/// as map keys and can be iterated in a stable order. The empty address is a
/// sentinel meaning "no destination".
///
/// # Examples
///
/// ```
/// use peernetic_core::Address;
///
/// let actor: Address = "runner:echoer".parse().unwrap();
/// let sub = actor.append_element("router");
/// assert!(actor.is_prefix_of(&sub));
/// assert_eq!(sub.remove_prefix(&actor).unwrap().to_string(), "router");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    elements: Vec<String>,
}

impl Address {
    /// The empty address.
    pub fn empty() -> Self {
        Address { elements: Vec::new() }
    }

    /// Construct from owned elements.
    ///
    /// Fails with [`AddressError::MalformedAddress`] if any element is empty.
    pub fn of<I, S>(elements: I) -> Result<Self, AddressError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let elements: Vec<String> = elements.into_iter().map(Into::into).collect();
        if elements.iter().any(String::is_empty) {
            return Err(AddressError::MalformedAddress(elements.join(":")));
        }
        Ok(Address { elements })
    }

    /// Construct a single-element address.
    pub fn of_element(element: impl Into<String>) -> Result<Self, AddressError> {
        Address::of([element.into()])
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// `true` if this is the empty sentinel address.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element at `index`, if present.
    pub fn element(&self, index: usize) -> Option<&str> {
        self.elements.get(index).map(String::as_str)
    }

    /// All elements in order.
    pub fn elements(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(String::as_str)
    }

    /// New address with `suffix`'s elements appended after this one's.
    pub fn append_suffix(&self, suffix: &Address) -> Address {
        let mut elements = self.elements.clone();
        elements.extend(suffix.elements.iter().cloned());
        Address { elements }
    }

    /// New address with one more element appended.
    ///
    /// # Panics
    ///
    /// Panics if `element` is empty; use [`Address::of`] when the element
    /// comes from untrusted input.
    pub fn append_element(&self, element: impl Into<String>) -> Address {
        let element = element.into();
        assert!(!element.is_empty(), "appended address element must be non-empty");
        let mut elements = self.elements.clone();
        elements.push(element);
        Address { elements }
    }

    /// `true` if `self`'s elements are an initial subsequence (proper or
    /// equal) of `other`'s.
    pub fn is_prefix_of(&self, other: &Address) -> bool {
        self.elements.len() <= other.elements.len()
            && self.elements.iter().zip(&other.elements).all(|(a, b)| a == b)
    }

    /// Remove `prefix` from the front of this address.
    ///
    /// Fails with [`AddressError::NotAPrefix`] if `prefix` is not a prefix
    /// of `self`.
    pub fn remove_prefix(&self, prefix: &Address) -> Result<Address, AddressError> {
        if !prefix.is_prefix_of(self) {
            return Err(AddressError::NotAPrefix {
                prefix: prefix.to_string(),
                address: self.to_string(),
            });
        }
        Ok(Address {
            elements: self.elements[prefix.elements.len()..].to_vec(),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.elements.join(":"))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Address::empty());
        }
        if s.split(':').any(str::is_empty) {
            return Err(AddressError::MalformedAddress(s.to_string()));
        }
        Ok(Address {
            elements: s.split(':').map(str::to_string).collect(),
        })
    }
}
