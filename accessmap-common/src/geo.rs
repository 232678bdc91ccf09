//! Geodesy helpers
//!
//! Coordinate validation on top of `geo::Point`, great-circle (haversine)
//! distance and destination from the `geo` crate, and the latitude/longitude
//! bounding boxes used to pre-filter SQL scans before the exact distance
//! check.

use ::geo::{Destination, Distance, Haversine, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius in meters, the sphere `geo::Haversine` measures on
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Coordinate validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("latitude {0} is outside [-90, 90]")]
    InvalidLatitude(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    InvalidLongitude(f64),
}

/// A validated WGS84 coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point, rejecting non-finite or out-of-range coordinates
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(GeoError::InvalidLatitude(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(GeoError::InvalidLongitude(longitude));
        }
        Ok(Self { latitude, longitude })
    }

    /// The same coordinate as a `geo` point (x = longitude, y = latitude)
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    /// Great-circle distance in meters
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        Haversine::distance(self.to_point(), other.to_point())
    }

    /// Point reached by moving `meters` along a fixed bearing (degrees from north)
    ///
    /// Used by tests and tooling to place coordinates at known distances.
    pub fn offset(&self, bearing_deg: f64, meters: f64) -> GeoPoint {
        let moved = Haversine::destination(self.to_point(), bearing_deg, meters);
        GeoPoint {
            latitude: moved.y().clamp(-90.0, 90.0),
            longitude: wrap_longitude(moved.x()),
        }
    }

    /// Bounding box that contains every point within `radius_m` of this point
    pub fn bounding_box(&self, radius_m: f64) -> BoundingBox {
        // Small margin so points right on the radius survive the pre-filter
        let angular = (radius_m / EARTH_RADIUS_M) * 1.01;
        let dlat = angular.to_degrees();

        let min_lat = self.latitude - dlat;
        let max_lat = self.latitude + dlat;

        if min_lat <= -90.0 || max_lat >= 90.0 {
            return BoundingBox {
                min_lat: min_lat.max(-90.0),
                max_lat: max_lat.min(90.0),
                longitudes: LongitudeRange::All,
            };
        }

        let cos_lat = self.latitude.to_radians().cos();
        let dlon_rad = (angular.sin() / cos_lat).min(1.0).asin();
        let dlon = dlon_rad.to_degrees();

        let min_lon = self.longitude - dlon;
        let max_lon = self.longitude + dlon;

        let longitudes = if dlon >= 180.0 {
            LongitudeRange::All
        } else if min_lon < -180.0 {
            LongitudeRange::Wrapped {
                east_of: min_lon + 360.0,
                west_of: max_lon,
            }
        } else if max_lon > 180.0 {
            LongitudeRange::Wrapped {
                east_of: min_lon,
                west_of: max_lon - 360.0,
            }
        } else {
            LongitudeRange::Span { min: min_lon, max: max_lon }
        };

        BoundingBox {
            min_lat,
            max_lat,
            longitudes,
        }
    }
}

impl From<GeoPoint> for Point<f64> {
    fn from(point: GeoPoint) -> Self {
        point.to_point()
    }
}

impl TryFrom<Point<f64>> for GeoPoint {
    type Error = GeoError;

    fn try_from(point: Point<f64>) -> Result<Self, Self::Error> {
        GeoPoint::new(point.y(), point.x())
    }
}

/// Bring a longitude back into [-180, 180]
fn wrap_longitude(mut lon: f64) -> f64 {
    while lon > 180.0 {
        lon -= 360.0;
    }
    while lon < -180.0 {
        lon += 360.0;
    }
    lon
}

/// Longitude extent of a bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LongitudeRange {
    /// Every longitude (polar caps)
    All,
    /// Ordinary contiguous range
    Span { min: f64, max: f64 },
    /// Range crossing the antimeridian: `lon >= east_of OR lon <= west_of`
    Wrapped { east_of: f64, west_of: f64 },
}

/// Latitude/longitude rectangle used as a coarse SQL pre-filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub longitudes: LongitudeRange,
}

impl BoundingBox {
    /// True when the point lies inside the box
    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.latitude < self.min_lat || point.latitude > self.max_lat {
            return false;
        }
        match self.longitudes {
            LongitudeRange::All => true,
            LongitudeRange::Span { min, max } => point.longitude >= min && point.longitude <= max,
            LongitudeRange::Wrapped { east_of, west_of } => {
                point.longitude >= east_of || point.longitude <= west_of
            }
        }
    }
}
