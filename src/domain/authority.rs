//! The fixed set of monitoring authorities and nearest-point lookup.

use geo::Point;
use serde::{Deserialize, Serialize};

use super::location::haversine_km;
use crate::{EngineError, Result};

/// Stable identifier for a monitoring authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorityId(String);

impl AuthorityId {
    /// Create an authority id from a stable string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AuthorityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AuthorityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A monitoring authority (e.g. a police station or safety cell).
///
/// Immutable after index load.
#[derive(Debug, Clone)]
pub struct Authority {
    id: AuthorityId,
    name: String,
    location: Point<f64>,
    contact: String,
}

impl Authority {
    /// Create a new authority. `lat`/`lng` are in degrees.
    pub fn new(
        id: impl Into<AuthorityId>,
        name: impl Into<String>,
        lat: f64,
        lng: f64,
        contact: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location: Point::new(lng, lat),
            contact: contact.into(),
        }
    }

    /// Get the authority id.
    pub fn id(&self) -> &AuthorityId {
        &self.id
    }

    /// Get the display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the authority's location (x = lng, y = lat).
    pub fn location(&self) -> Point<f64> {
        self.location
    }

    /// Get the contact reference.
    pub fn contact(&self) -> &str {
        &self.contact
    }
}

impl From<String> for AuthorityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Read-only index over the fixed authority set.
///
/// Lookup is an O(n) scan per call; the set is small (tens of entries) so no
/// spatial index is warranted. Revisit if the set grows beyond the low
/// hundreds.
#[derive(Debug, Clone)]
pub struct AuthorityIndex {
    authorities: Vec<Authority>,
}

impl AuthorityIndex {
    /// Build an index from a non-empty authority set.
    pub fn new(authorities: Vec<Authority>) -> Result<Self> {
        if authorities.is_empty() {
            return Err(EngineError::NoAuthorities);
        }
        Ok(Self { authorities })
    }

    /// The authority nearest to `location` by great-circle distance.
    ///
    /// Exact ties go to the authority encountered first in load order. That
    /// is a deliberate determinism policy, not a geometric statement: the
    /// strict `<` below never replaces an equal-distance candidate.
    pub fn nearest(&self, location: Point<f64>) -> &Authority {
        let mut best = &self.authorities[0];
        let mut best_km = haversine_km(location, best.location);

        for authority in &self.authorities[1..] {
            let km = haversine_km(location, authority.location);
            if km < best_km {
                best_km = km;
                best = authority;
            }
        }
        best
    }

    /// The deterministic fallback authority (first in load order), used for
    /// transient distress sessions with no meaningful location context.
    pub fn default_authority(&self) -> &Authority {
        &self.authorities[0]
    }

    /// Look up an authority by id.
    pub fn get(&self, id: &AuthorityId) -> Option<&Authority> {
        self.authorities.iter().find(|a| a.id() == id)
    }

    /// Number of authorities in the index.
    pub fn len(&self) -> usize {
        self.authorities.len()
    }

    /// Whether the index is empty (never true for a constructed index).
    pub fn is_empty(&self) -> bool {
        self.authorities.is_empty()
    }

    /// Iterate over the authorities in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Authority> {
        self.authorities.iter()
    }

    /// The Patiala deployment's station set, useful for demos and tests.
    pub fn patiala_seed() -> Result<Self> {
        Self::new(vec![
            Authority::new("st_patiala_01", "Civil Lines Police Station", 30.3400, 76.3860, "100"),
            Authority::new("st_patiala_02", "Urban Estate Police Station", 30.3500, 76.4300, "100"),
            Authority::new("st_patiala_03", "Tripuri Police Station", 30.3650, 76.3900, "100"),
            Authority::new("st_patiala_04", "Sadar Police Station", 30.3250, 76.4020, "100"),
            Authority::new("st_patiala_05", "Lahori Gate Police Station", 30.3350, 76.3950, "100"),
            Authority::new("st_patiala_06", "Kotwali Police Station", 30.3400, 76.4000, "100"),
            Authority::new("st_patiala_07", "Anaj Mandi Police Station", 30.3300, 76.3700, "100"),
            Authority::new("st_patiala_08", "Model Town Police Station", 30.3550, 76.3800, "100"),
            Authority::new("st_patiala_09", "Women Cell Patiala", 30.3450, 76.3850, "1091"),
            Authority::new("st_patiala_10", "Passey Road Police Station", 30.3600, 76.4100, "100"),
        ])
    }
}
