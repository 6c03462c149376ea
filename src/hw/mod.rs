mod adapter;
mod btleplug_backend;
mod fake_backend;
mod hardware;
mod model;
mod session;

pub use self::adapter::{ConnectionHandle, Subscription, TransportAdapter};
pub use self::fake_backend::{
    FakeBackend, FakeBackendConfig, FakeRecorder, FakeScript, ScanFixture,
};
pub use self::hardware::{
    AdvertisementStream, GattLink, NotificationStream, TransportBackend, fake_transport_backend,
    real_transport_backend,
};
pub use self::model::{Advertisement, CharacteristicInfo, RadioState, ScannedDevice, ServiceInfo};
pub(crate) use self::model::UNKNOWN_SIGNAL_STRENGTH;
