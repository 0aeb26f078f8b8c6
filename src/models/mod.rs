pub mod availability;
pub mod booking;
pub mod payment_event;
pub mod service;
pub mod studio;

pub use availability::{AvailabilityWindow, WeeklySchedule};
pub use booking::{Booking, BookingStatus, BookingUpdate, ClientInfo, PaymentStatus};
pub use payment_event::{PaymentEvent, PaymentEventKind, PaymentEventRecord, PaymentEventType};
pub use service::Service;
pub use studio::Studio;
