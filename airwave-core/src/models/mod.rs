pub mod event;
pub mod livestream;
pub mod principal;
pub mod recording;
pub mod song;
pub mod webhook;

pub use event::{canonical_json, EventData, EventEnvelope, EventType, SongMetadata, Source};
pub use livestream::{DisconnectReason, LivestreamSlot, LivestreamTimeLedger};
pub use principal::{Principal, PrincipalKind};
pub use recording::Recording;
pub use song::{QueueKind, Song};
pub use webhook::{DeliveryStatus, WebhookDelivery, WebhookSubscription};
