use geo::{Coord, MultiPolygon};
use geojson::GeoJson;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RoutingConfig;
use crate::geometry;

// Travel profiles understood by the isochrone endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingProfile {
    DrivingCar,
    DrivingHgv,
    CyclingRegular,
    CyclingRoad,
    CyclingMountain,
    CyclingElectric,
    FootWalking,
    FootHiking,
    Wheelchair,
}

impl RoutingProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingProfile::DrivingCar => "driving-car",
            RoutingProfile::DrivingHgv => "driving-hgv",
            RoutingProfile::CyclingRegular => "cycling-regular",
            RoutingProfile::CyclingRoad => "cycling-road",
            RoutingProfile::CyclingMountain => "cycling-mountain",
            RoutingProfile::CyclingElectric => "cycling-electric",
            RoutingProfile::FootWalking => "foot-walking",
            RoutingProfile::FootHiking => "foot-hiking",
            RoutingProfile::Wheelchair => "wheelchair",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeType {
    Time,
    Distance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IsochroneRequest {
    pub profile: RoutingProfile,
    pub range_type: RangeType,
    pub range: f64,
    pub attributes: Vec<String>,
}

impl From<&RoutingConfig> for IsochroneRequest {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            profile: config.profile,
            range_type: config.range_type,
            range: config.range,
            attributes: config.attributes.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("request timed out: {0}")]
    Timeout(reqwest::Error),
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("quota exceeded (HTTP {status}): {body}")]
    QuotaExceeded { status: u16, body: String },
    #[error("unauthorized (HTTP {status}): {body}")]
    Unauthorized { status: u16, body: String },
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },
    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RoutingError {
    /// Worth another attempt after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RoutingError::Timeout(_) | RoutingError::Transport(_) | RoutingError::Server { .. }
        )
    }

    /// The service refuses further work for this session; the run stops and
    /// may be resumed later.
    pub fn stops_run(&self) -> bool {
        matches!(
            self,
            RoutingError::QuotaExceeded { .. } | RoutingError::Unauthorized { .. }
        )
    }
}

impl From<reqwest::Error> for RoutingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RoutingError::Timeout(err)
        } else {
            RoutingError::Transport(err)
        }
    }
}

/// One isochrone polygon per call for a single location.
#[allow(async_fn_in_trait)]
pub trait IsochroneService {
    async fn isochrone(
        &self,
        location: Coord<f64>,
        request: &IsochroneRequest,
    ) -> Result<MultiPolygon<f64>, RoutingError>;
}

impl<T: IsochroneService> IsochroneService for &T {
    async fn isochrone(
        &self,
        location: Coord<f64>,
        request: &IsochroneRequest,
    ) -> Result<MultiPolygon<f64>, RoutingError> {
        (**self).isochrone(location, request).await
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    locations: [[f64; 2]; 1],
    range: [f64; 1],
    range_type: RangeType,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    attributes: &'a [String],
}

// Function to create the JSON body of an isochrone request
pub fn create_request_body(location: Coord<f64>, request: &IsochroneRequest) -> serde_json::Value {
    let body = RequestBody {
        locations: [[location.x, location.y]],
        range: [request.range],
        range_type: request.range_type,
        attributes: &request.attributes,
    };
    // Plain structs of numbers and strings always serialize
    serde_json::to_value(body).unwrap_or(serde_json::Value::Null)
}

pub fn isochrone_url(base_url: &str, profile: RoutingProfile) -> String {
    format!(
        "{}/v2/isochrones/{}",
        base_url.trim_end_matches('/'),
        profile.as_str()
    )
}

pub fn classify_status(status: StatusCode, body: String) -> RoutingError {
    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED => RoutingError::Unauthorized { status: code, body },
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            RoutingError::QuotaExceeded { status: code, body }
        }
        s if s.is_server_error() => RoutingError::Server { status: code, body },
        _ => RoutingError::Rejected { status: code, body },
    }
}

/// Takes the geometry of the first feature of an isochrone response.
pub fn parse_isochrone_response(body: &str) -> Result<MultiPolygon<f64>, RoutingError> {
    let geojson = body
        .parse::<GeoJson>()
        .map_err(|e| RoutingError::InvalidResponse(e.to_string()))?;

    let geometry = match geojson {
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .next()
            .and_then(|feature| feature.geometry),
        GeoJson::Feature(feature) => feature.geometry,
        GeoJson::Geometry(geometry) => Some(geometry),
    }
    .ok_or_else(|| RoutingError::InvalidResponse("response carries no geometry".to_string()))?;

    let geometry = geo::Geometry::<f64>::try_from(geometry)
        .map_err(|e| RoutingError::InvalidResponse(e.to_string()))?;

    geometry::to_multipolygon(geometry)
        .ok_or_else(|| RoutingError::InvalidResponse("geometry is not polygonal".to_string()))
}

/// Client for the OpenRouteService isochrone endpoint.
pub struct OpenRouteService {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenRouteService {
    pub fn new(api_key: impl Into<String>, config: &RoutingConfig) -> Result<Self, RoutingError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: config.base_url.clone(),
        })
    }
}

impl IsochroneService for OpenRouteService {
    async fn isochrone(
        &self,
        location: Coord<f64>,
        request: &IsochroneRequest,
    ) -> Result<MultiPolygon<f64>, RoutingError> {
        let response = self
            .client
            .post(isochrone_url(&self.base_url, request.profile))
            .header("Authorization", &self.api_key)
            .header("Accept", "application/geo+json, application/json")
            .json(&create_request_body(location, request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            parse_isochrone_response(&body)
        } else {
            Err(classify_status(status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;
    use serde_json::json;

    fn request() -> IsochroneRequest {
        IsochroneRequest::from(&RoutingConfig::default())
    }

    #[test]
    fn url_uses_profile_path() {
        assert_eq!(
            isochrone_url("https://api.openrouteservice.org/", RoutingProfile::FootWalking),
            "https://api.openrouteservice.org/v2/isochrones/foot-walking"
        );
    }

    #[test]
    fn body_has_single_location_in_lon_lat_order() {
        let body = create_request_body(Coord { x: 13.4, y: 52.5 }, &request());
        assert_eq!(
            body,
            json!({
                "locations": [[13.4, 52.5]],
                "range": [500.0],
                "range_type": "distance",
                "attributes": ["area"],
            })
        );
    }

    #[test]
    fn empty_attributes_are_omitted() {
        let mut request = request();
        request.attributes.clear();
        let body = create_request_body(Coord { x: 0.0, y: 0.0 }, &request);
        assert!(body.get("attributes").is_none());
    }

    #[test]
    fn parses_first_feature_polygon() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"group_index": 0, "value": 500.0, "area": 1.0},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                }
            }]
        })
        .to_string();

        let polygon = parse_isochrone_response(&body).unwrap();
        assert_eq!(polygon.0.len(), 1);
        assert!((polygon.unsigned_area() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_response_without_features() {
        let body = json!({"type": "FeatureCollection", "features": []}).to_string();
        assert!(matches!(
            parse_isochrone_response(&body),
            Err(RoutingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn rejects_non_polygonal_geometry() {
        let body = json!({"type": "Point", "coordinates": [1.0, 2.0]}).to_string();
        assert!(matches!(
            parse_isochrone_response(&body),
            Err(RoutingError::InvalidResponse(_))
        ));
    }

    #[test]
    fn status_mapping() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).stops_run());
        assert!(classify_status(StatusCode::FORBIDDEN, String::new()).stops_run());
        assert!(classify_status(StatusCode::UNAUTHORIZED, String::new()).stops_run());

        let server = classify_status(StatusCode::BAD_GATEWAY, String::new());
        assert!(server.is_retryable());
        assert!(!server.stops_run());

        let rejected = classify_status(StatusCode::NOT_FOUND, "no routable point".into());
        assert!(!rejected.is_retryable());
        assert!(!rejected.stops_run());
    }
}
