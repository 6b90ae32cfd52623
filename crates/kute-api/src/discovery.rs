//! The in-memory half of the discovery pipeline.
//!
//! The database narrows candidates down to "not me, not blocked, not frozen,
//! gender-compatible"; everything that needs derived values happens here:
//! suppression of already-interacted users, the geo radius filter with
//! nearest-first ordering, pagination, and finally the age filter. Age runs
//! after pagination because it is computed from `birthDate` rather than
//! stored, so a page may come back short of `limit` — accepted trade-off.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use uuid::Uuid;

use kute_types::api::{AgeRange, GeoPoint, UserProfile};

const EARTH_RADIUS_KM: f64 = 6371.0;

pub fn assemble_feed(
    viewer: &UserProfile,
    candidates: Vec<UserProfile>,
    interacted: &HashSet<Uuid>,
    page: usize,
    limit: usize,
    today: NaiveDate,
) -> Vec<UserProfile> {
    let mut pool: Vec<UserProfile> = candidates
        .into_iter()
        .filter(|c| !interacted.contains(&c.id))
        .collect();

    if !viewer.location.is_unset() {
        pool.retain(|c| {
            !c.location.is_unset()
                && haversine_km(viewer.location, c.location) <= viewer.max_distance
        });
        pool.sort_by(|a, b| {
            let da = haversine_km(viewer.location, a.location);
            let db = haversine_km(viewer.location, b.location);
            da.total_cmp(&db)
        });
    }

    let skip = page.saturating_sub(1).saturating_mul(limit);
    pool.into_iter()
        .skip(skip)
        .take(limit)
        .filter(|c| within_age_range(c.birth_date, viewer.age_range, today))
        .collect()
}

/// Great-circle distance in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Whole years elapsed, decremented by one when today's month/day precedes
/// the birthday's.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

/// Inclusive on both bounds; unknown birth dates always pass.
pub fn within_age_range(birth: Option<NaiveDate>, range: AgeRange, today: NaiveDate) -> bool {
    match birth {
        Some(birth) => {
            let age = age_on(birth, today);
            age >= range.min as i32 && age <= range.max as i32
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use kute_types::api::Gender;

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            name: name.to_string(),
            bio: String::new(),
            photos: Vec::new(),
            gender: None,
            interested_in: Vec::new(),
            birth_date: None,
            location: GeoPoint::UNSET,
            interests: Vec::new(),
            age_range: AgeRange::default(),
            max_distance: 100.0,
            blocked_users: Vec::new(),
            frozen: false,
            is_demo: false,
            created_at: DateTime::<Utc>::default(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn age_decrements_before_the_birthday() {
        let birth = date(2000, 6, 15);
        assert_eq!(age_on(birth, date(2026, 6, 14)), 25);
        assert_eq!(age_on(birth, date(2026, 6, 15)), 26);
        assert_eq!(age_on(birth, date(2026, 6, 16)), 26);
    }

    #[test]
    fn age_bounds_are_inclusive_and_unknown_passes() {
        let today = date(2026, 1, 1);
        let range = AgeRange { min: 18, max: 30 };

        // Exactly 18 and exactly 30: in.
        assert!(within_age_range(Some(date(2008, 1, 1)), range, today));
        assert!(within_age_range(Some(date(1996, 1, 1)), range, today));
        // One year outside either bound: out.
        assert!(!within_age_range(Some(date(2009, 1, 1)), range, today));
        assert!(!within_age_range(Some(date(1995, 1, 1)), range, today));
        // No birth date: always in.
        assert!(within_age_range(None, range, today));
    }

    #[test]
    fn haversine_matches_known_city_distance() {
        // Paris -> London is roughly 344 km.
        let paris = GeoPoint {
            longitude: 2.3522,
            latitude: 48.8566,
        };
        let london = GeoPoint {
            longitude: -0.1278,
            latitude: 51.5074,
        };
        let d = haversine_km(paris, london);
        assert!((330.0..360.0).contains(&d), "got {}", d);
        assert_eq!(haversine_km(paris, paris), 0.0);
    }

    #[test]
    fn feed_without_viewer_location_skips_the_geo_filter() {
        // A wants women 18-30; B (f, 25) is in, C (m, 25) was already
        // filtered by the database gender pass, D (f, 40) is out by age.
        let today = date(2026, 1, 1);
        let mut viewer = profile("a");
        viewer.interested_in = vec![Gender::Female];
        viewer.age_range = AgeRange { min: 18, max: 30 };

        let mut b = profile("b");
        b.gender = Some(Gender::Female);
        b.birth_date = Some(date(2001, 1, 1));
        let mut d = profile("d");
        d.gender = Some(Gender::Female);
        d.birth_date = Some(date(1986, 1, 1));

        // Candidates are far away, but A never set a location.
        b.location = GeoPoint {
            longitude: 139.65,
            latitude: 35.68,
        };

        let feed = assemble_feed(
            &viewer,
            vec![b.clone(), d],
            &HashSet::new(),
            1,
            50,
            today,
        );
        let names: Vec<&str> = feed.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["b"]);
    }

    #[test]
    fn feed_filters_radius_and_sorts_nearest_first() {
        let today = date(2026, 1, 1);
        let mut viewer = profile("viewer");
        viewer.location = GeoPoint {
            longitude: 0.0,
            latitude: 45.0,
        };
        viewer.max_distance = 200.0;

        let mut near = profile("near");
        near.location = GeoPoint {
            longitude: 0.0,
            latitude: 45.5,
        };
        let mut nearer = profile("nearer");
        nearer.location = GeoPoint {
            longitude: 0.0,
            latitude: 45.1,
        };
        let mut far = profile("far");
        far.location = GeoPoint {
            longitude: 0.0,
            latitude: 50.0,
        };
        let unset = profile("unset");

        let feed = assemble_feed(
            &viewer,
            vec![near, far, unset, nearer],
            &HashSet::new(),
            1,
            50,
            today,
        );
        let names: Vec<&str> = feed.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["nearer", "near"]);
    }

    #[test]
    fn feed_drops_interacted_ids_before_paginating() {
        let today = date(2026, 1, 1);
        let viewer = profile("viewer");

        let seen = profile("seen");
        let fresh = profile("fresh");
        let interacted: HashSet<Uuid> = [seen.id].into_iter().collect();

        let feed = assemble_feed(&viewer, vec![seen, fresh], &interacted, 1, 50, today);
        let names: Vec<&str> = feed.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["fresh"]);
    }

    #[test]
    fn pages_may_run_short_after_the_age_filter() {
        let today = date(2026, 1, 1);
        let mut viewer = profile("viewer");
        viewer.age_range = AgeRange { min: 18, max: 30 };

        let mut candidates = Vec::new();
        for i in 0..5 {
            let mut c = profile(&format!("c{}", i));
            // Two in range, two too old.
            c.birth_date = Some(if i % 2 == 0 {
                date(2000, 1, 1)
            } else {
                date(1980, 1, 1)
            });
            candidates.push(c);
        }

        let page1 = assemble_feed(&viewer, candidates.clone(), &HashSet::new(), 1, 3, today);
        assert_eq!(page1.len(), 2); // 3 paginated, 1 aged out

        let page2 = assemble_feed(&viewer, candidates, &HashSet::new(), 2, 3, today);
        assert_eq!(page2.len(), 1);
    }
}
