use serde::Serialize;

use crate::domain::Geocode;

/// Everything needed to issue one `alertcity` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDescriptor {
    pub base_url: String,
    pub geocode: Geocode,
    pub disease: String,
    pub format: String,
    pub ew_start: u32,
    pub ew_end: u32,
    pub ey_start: i32,
    pub ey_end: i32,
}

/// Descriptor for a single city, year and week.
pub fn build_request(
    base_url: &str,
    geocode: &Geocode,
    disease: &str,
    format: &str,
    year: i32,
    week: u32,
) -> RequestDescriptor {
    RequestDescriptor {
        base_url: base_url.to_string(),
        geocode: geocode.clone(),
        disease: disease.to_string(),
        format: format.to_string(),
        ew_start: week,
        ew_end: week,
        ey_start: year,
        ey_end: year,
    }
}

impl RequestDescriptor {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("geocode", self.geocode.to_string()),
            ("disease", self.disease.clone()),
            ("format", self.format.clone()),
            ("ew_start", self.ew_start.to_string()),
            ("ew_end", self.ew_end.to_string()),
            ("ey_start", self.ey_start.to_string()),
            ("ey_end", self.ey_end.to_string()),
        ]
    }

    pub fn url(&self) -> String {
        let query = self
            .query_pairs()
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.base_url)
    }
}
