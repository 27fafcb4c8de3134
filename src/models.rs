use serde::{Deserialize, Serialize};

/// Body returned by the bookings endpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BookingsPage {
    pub bookings: Vec<Booking>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Booking {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub session: Session,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[allow(non_snake_case)]
pub struct Session {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// UTC, `YYYY-MM-DD HH:MM:SS`
    pub start_date: String,
    /// UTC, `YYYY-MM-DD HH:MM:SS`
    pub end_date: String,
    pub training_category: TrainingCategory,
    pub maxBookingSlots: i64,
    pub availableBookingSpots: i64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub business_entity: Option<BusinessEntity>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrainingCategory {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BusinessEntity {
    #[serde(rename = "Address")]
    pub address: String,
    pub zipcode: String,
    pub city: String,
}
