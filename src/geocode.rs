use crate::error::Result;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

const USER_AGENT: &str = concat!("wodz_ics/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Resolves a postal address to coordinates.
pub trait Geocoder {
    /// `Ok(None)` when the address matched nothing.
    fn locate(&self, address: &str) -> Result<Option<GeoPoint>>;
}

/// Nominatim search restricted to one country.
pub struct NominatimGeocoder {
    http: Client,
    url: String,
    country: String,
}

#[derive(Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(url: impl Into<String>, country: impl Into<String>) -> NominatimGeocoder {
        NominatimGeocoder {
            http: Client::new(),
            url: url.into(),
            country: country.into(),
        }
    }
}

impl Geocoder for NominatimGeocoder {
    fn locate(&self, address: &str) -> Result<Option<GeoPoint>> {
        let places: Vec<Place> = self
            .http
            .get(&self.url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&[
                ("q", address),
                ("format", "jsonv2"),
                ("limit", "1"),
                ("countrycodes", self.country.as_str()),
            ])
            .send()?
            .error_for_status()?
            .json()?;

        let point = places.into_iter().next().and_then(|place| {
            Some(GeoPoint {
                latitude: place.lat.parse().ok()?,
                longitude: place.lon.parse().ok()?,
            })
        });
        debug!("Geocoded '{}' to {:?}", address, point);

        Ok(point)
    }
}
