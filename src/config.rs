use chrono_tz::Tz;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_BOOKINGS_URL: &str = "https://wodz.app/subscriber/booking/subscriberNextBookings";
pub const DEFAULT_OUTPUT_ICS: &str = "./wodz.ics";
pub const DEFAULT_COOKIES_DIR: &str = "/cookies";
pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";

const DOTENV_PATH: &str = ".env";

#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub bookings_url: String,
    pub seed_cookie: String,
    pub output_ics: PathBuf,
    /// `None` disables cookie persistence.
    pub cookies_dir: Option<PathBuf>,
    pub time_zone: String,
    /// `None` disables geocoding.
    pub geocode_country: Option<String>,
    pub geocoder_url: String,
}

impl Config {
    /// Resolve the configuration from the process environment and `.env`.
    pub fn load() -> Config {
        let dotenv = match dotenvy::from_path_iter(DOTENV_PATH) {
            Ok(iter) => iter.filter_map(|item| item.ok()).collect(),
            Err(_) => HashMap::new(),
        };
        let environment: HashMap<String, String> = env::vars().collect();

        Config::from_sources(&dotenv, &environment)
    }

    /// Environment wins over `.env`, which wins over the built-in defaults.
    pub fn from_sources(
        dotenv: &HashMap<String, String>,
        environment: &HashMap<String, String>,
    ) -> Config {
        let lookup = |key: &str| -> Option<String> {
            environment
                .get(key)
                .or_else(|| dotenv.get(key))
                .map(|value| value.to_string())
        };
        let non_empty = |value: String| if value.is_empty() { None } else { Some(value) };

        // the alias is resolved per source so the environment still wins
        let seed_from = |source: &HashMap<String, String>| {
            source
                .get("SEED_COOKIE")
                .or_else(|| source.get("COOKIE"))
                .cloned()
        };
        let seed_cookie = seed_from(environment)
            .or_else(|| seed_from(dotenv))
            .unwrap_or_default();

        let cookies_dir = match lookup("COOKIES_DIR") {
            Some(dir) => non_empty(dir).map(PathBuf::from),
            None => Some(PathBuf::from(DEFAULT_COOKIES_DIR)),
        };

        Config {
            bookings_url: lookup("API_BOOKINGS_URL")
                .unwrap_or_else(|| DEFAULT_BOOKINGS_URL.to_string()),
            seed_cookie,
            output_ics: PathBuf::from(
                lookup("OUTPUT_ICS").unwrap_or_else(|| DEFAULT_OUTPUT_ICS.to_string()),
            ),
            cookies_dir,
            time_zone: lookup("TZ")
                .and_then(non_empty)
                .unwrap_or_else(|| "UTC".to_string()),
            geocode_country: lookup("GEOCODE_COUNTRY").and_then(non_empty),
            geocoder_url: lookup("GEOCODER_URL")
                .unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string()),
        }
    }

    /// The zone event times are expressed in. Unknown names fall back to UTC.
    pub fn time_zone(&self) -> Tz {
        // TZ may use the POSIX ":Area/City" form
        let name = self.time_zone.trim_start_matches(':');
        name.parse::<Tz>().unwrap_or_else(|_| {
            warn!("Unknown time zone '{}', using UTC", self.time_zone);
            Tz::UTC
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seed_cookie = if self.seed_cookie.is_empty() {
            "<empty>"
        } else {
            "<redacted>"
        };
        f.debug_struct("Config")
            .field("bookings_url", &self.bookings_url)
            .field("seed_cookie", &seed_cookie)
            .field("output_ics", &self.output_ics)
            .field("cookies_dir", &self.cookies_dir)
            .field("time_zone", &self.time_zone)
            .field("geocode_country", &self.geocode_country)
            .field("geocoder_url", &self.geocoder_url)
            .finish()
    }
}
