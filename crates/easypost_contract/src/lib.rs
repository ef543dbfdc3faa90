pub mod customs;
pub mod event;
pub mod jobs;
pub mod model;
pub mod package;
pub mod rates;
pub mod status;
pub mod wire;

pub use customs::{ContentsType, CustomsInfo, CustomsItem, NonDeliveryOption, RestrictionType};
pub use event::{parse_event_time, Event, EventError, EventKind, Tracker, TrackingDetail, TRACKER_UPDATED};
pub use jobs::{JobId, JobKind, JobStatus};
pub use model::{
    Address, AddressId, InvalidParcel, Label, LabelArtifact, LabelId, NewAddress, NewLabel,
    NewParcel, NewShipment, Parcel, ParcelId, ParcelShape, ProviderId, Shipment, ShipmentId,
    TrackingHistoryEntry, DEFAULT_COUNTRY,
};
pub use package::PredefinedPackage;
pub use rates::{lowest_rate, RateFilter};
pub use status::{Carrier, EelCode, LabelFormat, ParseEnumError, RefundStatus, TrackingStatus};
pub use wire::{
    AddressFields, ParcelRef, ParcelRequest, PostageLabel, ProviderAddress, ProviderParcel,
    ProviderShipment, Rate, ShipmentRequest,
};
