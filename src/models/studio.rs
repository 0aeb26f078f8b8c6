use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Studio {
    pub id: String,
    pub name: String,
    /// IANA zone name, e.g. "Europe/Berlin". Opening hours are read in this zone.
    pub timezone: String,
}

impl Studio {
    pub fn tz(&self) -> anyhow::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("invalid timezone: {}", self.timezone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tz_parses_iana_names() {
        let studio = Studio {
            id: "s1".to_string(),
            name: "Loft".to_string(),
            timezone: "America/New_York".to_string(),
        };
        assert_eq!(studio.tz().unwrap(), chrono_tz::America::New_York);
    }

    #[test]
    fn test_tz_rejects_garbage() {
        let studio = Studio {
            id: "s1".to_string(),
            name: "Loft".to_string(),
            timezone: "Mars/Olympus".to_string(),
        };
        assert!(studio.tz().is_err());
    }
}
