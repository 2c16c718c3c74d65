/*!
Opaque instance identifiers and the process-wide qualified-name separator.

Model elements are addressed by arena indices; instances, which outlive any single evaluation
and may be persisted elsewhere, carry a string identifier that can be represented as, and parsed
from, a `String`. An identifier is a sequence of segments joined by `"::"`; the segment rules
exist only to keep that representation unambiguous, so an identifier always parses back to
itself.

# Example

```rust
use statechart::tag::InstanceId;

let first = InstanceId::random_with_prefix("player").unwrap();
let _next = first.append_random();
```
*/

use std::fmt::Display;
use std::str::FromStr;
use std::sync::RwLock;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// The identifier attached to a state machine instance. Purposefully opaque.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

///
/// Provides a common error implementation, error kind enumeration, and constrained result type
/// for identifier creation/parsing.
///
pub mod error {
    error_chain! {
        errors {
            #[doc = "An identifier segment was empty."]
            MissingSegment {
                description("An identifier segment was empty.")
                display("An identifier segment was empty.")
            }
            #[doc = "An identifier segment contains the `::` joint and would not round-trip."]
            AmbiguousSegment(segment: String) {
                description("An identifier segment contains the `::` joint and would not round-trip.")
                display("Identifier segment `{}` contains the `::` joint and would not round-trip.", segment)
            }
            #[doc = "An identifier segment contains whitespace or a control character."]
            UnprintableCharacter(found: char) {
                description("An identifier segment contains whitespace or a control character.")
                display("Identifier segment contains disallowed character {:?}.", found)
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

///
/// The separator used when composing qualified names, `"."` unless overridden.
///
pub fn namespace_separator() -> String {
    match NAMESPACE_SEPARATOR.read() {
        Ok(separator) => separator.clone(),
        Err(_) => DEFAULT_SEPARATOR.to_string(),
    }
}

///
/// Replace the separator used when composing qualified names. This affects every model in the
/// process; qualified names are derived on demand so existing models pick the change up
/// immediately.
///
pub fn set_namespace_separator(separator: &str) {
    if let Ok(mut current) = NAMESPACE_SEPARATOR.write() {
        *current = separator.to_string();
    }
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

lazy_static! {
    static ref NAMESPACE_SEPARATOR: RwLock<String> = RwLock::new(DEFAULT_SEPARATOR.to_string());
}

const DEFAULT_SEPARATOR: &str = ".";
const SEGMENT_JOINT: &str = "::";

impl Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for segment in s.split(SEGMENT_JOINT) {
            Self::check_segment(segment)?;
        }
        Ok(Self(s.to_string()))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::random()
    }
}

impl InstanceId {
    pub fn random() -> Self {
        Self(blob_uuid::random_blob())
    }

    pub fn random_with_prefix(prefix: &str) -> error::Result<Self> {
        Ok(Self::random_segment().prefixed(prefix)?)
    }

    ///
    /// Extend the identifier with one more segment, as when deriving a child instance's
    /// identifier from its parent's.
    ///
    pub fn append(&self, suffix: &str) -> error::Result<Self> {
        Self::check_segment(suffix)?;
        Ok(Self([self.0.as_str(), suffix].join(SEGMENT_JOINT)))
    }

    pub fn append_random(&self) -> Self {
        let blob = blob_uuid::random_blob();
        Self([self.0.as_str(), blob.as_str()].join(SEGMENT_JOINT))
    }

    ///
    /// The segments the identifier was composed from, in order.
    ///
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEGMENT_JOINT)
    }

    pub fn is_valid(&self) -> bool {
        self.segments()
            .all(|segment| Self::check_segment(segment).is_ok())
    }

    fn random_segment() -> Self {
        Self(blob_uuid::random_blob())
    }

    fn prefixed(self, prefix: &str) -> error::Result<Self> {
        Self::check_segment(prefix)?;
        Ok(Self([prefix, self.0.as_str()].join(SEGMENT_JOINT)))
    }

    ///
    /// A segment is anything that survives the `Display`/`FromStr` round-trip intact: it may
    /// not be empty, may not itself contain the joint, and may not carry whitespace or control
    /// characters that would be mangled in logs.
    ///
    fn check_segment(segment: &str) -> error::Result<()> {
        if segment.is_empty() {
            return Err(error::ErrorKind::MissingSegment.into());
        }
        if segment.contains(SEGMENT_JOINT) {
            return Err(error::ErrorKind::AmbiguousSegment(segment.to_string()).into());
        }
        match segment
            .chars()
            .find(|c| c.is_whitespace() || c.is_control())
        {
            Some(found) => Err(error::ErrorKind::UnprintableCharacter(found).into()),
            None => Ok(()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------
