pub mod conversation;
pub mod garmin;
pub mod lab;
pub mod user;

pub use conversation::{Conversation, ConversationType, Message, MessageRole};
pub use garmin::{ConnectionRead, GarminConnection, GarminDataPoint};
pub use lab::{
    BiomarkerHistoryPoint, BiomarkerStatus, LabBiomarkerValue, LabOrder, LabPanel, LabPartner,
    LabResult, OrderRead, OrderStatus, PortalOrderRead, ProcessingStatus, ResultRead,
    ResultSummaryRead,
};
pub use user::{User, UserHealthProfile, UserRead};
