pub mod adapter;
pub mod error;
pub mod events;
pub mod id;
pub mod interaction;
pub mod outcome;
pub mod reference;
pub mod resource;
pub mod tenant;
pub mod time;

pub use adapter::{JsonVersionAdapter, Mime, ResolverFn, TypedElement, VersionAdapter};
pub use error::{CoreError, ErrorCategory, Result};
pub use events::{EventBroadcaster, StoreEvent};
pub use id::{generate_id, validate_id, IdError};
pub use interaction::{parse_interaction, Interaction, InteractionParseError, ParsedInteraction};
pub use outcome::{IssueSeverity, OperationOutcome, OperationOutcomeIssue};
pub use reference::{
    normalize_reference_for_index, normalize_reference_string, parse_reference,
    parse_reference_simple, FhirReference, NormalizedRef, UnresolvableReference,
};
pub use resource::{next_version, StoredResource};
pub use tenant::{FhirVersion, SmartPolicy, Tenant};
pub use time::{now_utc, FhirDateTime};
