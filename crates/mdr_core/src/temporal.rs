//! Temporal status resolution.
//!
//! A status is valid on `when` if `registration_date <= when` and its
//! `until_date` is open or `>= when`. Per authority the valid status with the
//! latest `(registration_date, created)` wins. An authority with no valid
//! status contributes nothing; there is no default state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;

use crate::types::{AuthorityId, Status};

/// Current status per authority at `when`, ordered by authority id.
///
/// `authorities = None` considers every authority referenced by `statuses`;
/// `Some(set)` restricts to that set (an empty set yields nothing).
pub fn current_statuses<'a>(
    statuses: &'a [Status],
    authorities: Option<&BTreeSet<AuthorityId>>,
    when: NaiveDate,
) -> Vec<&'a Status> {
    let mut winners: BTreeMap<AuthorityId, &'a Status> = BTreeMap::new();

    for status in statuses {
        if let Some(allowed) = authorities {
            if !allowed.contains(&status.authority) {
                continue;
            }
        }
        if !status.is_valid_on(when) {
            continue;
        }
        winners
            .entry(status.authority)
            .and_modify(|current| {
                if precedence(status) > precedence(current) {
                    *current = status;
                }
            })
            .or_insert(status);
    }

    winners.into_values().collect()
}

// Ties on date and creation time fall back to the id so results are stable.
fn precedence(status: &Status) -> (NaiveDate, chrono::DateTime<chrono::Utc>, uuid::Uuid) {
    (status.registration_date, status.created, status.id.as_uuid())
}

/// Any status at all, current or not.
pub fn is_registered(statuses: &[Status]) -> bool {
    !statuses.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, State, StatusId};
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use strum::IntoEnumIterator;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn status(
        authority: AuthorityId,
        state: State,
        from: NaiveDate,
        until: Option<NaiveDate>,
    ) -> Status {
        Status {
            id: StatusId::new(),
            item: ItemId::new(),
            authority,
            state,
            registration_date: from,
            until_date: until,
            change_details: String::new(),
            created: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_input_yields_empty() {
        assert!(current_statuses(&[], None, date(2020, 1, 1)).is_empty());
    }

    #[test]
    fn temporal_window_example() {
        let ra = AuthorityId::new();
        let a = status(ra, State::Incomplete, date(2000, 1, 1), None);
        let b = status(ra, State::Standard, date(2005, 1, 1), Some(date(2005, 6, 29)));
        let c = status(ra, State::Standard, date(2005, 7, 1), None);
        let all = vec![a.clone(), b.clone(), c.clone()];

        let current = current_statuses(&all, None, date(2005, 6, 30));
        assert_eq!(current, vec![&a]);

        let current = current_statuses(&all, None, date(2005, 7, 1));
        assert_eq!(current, vec![&c]);

        let current = current_statuses(&all, None, date(2005, 3, 1));
        assert_eq!(current, vec![&b]);
    }

    #[test]
    fn later_created_wins_same_day() {
        let ra = AuthorityId::new();
        let first = status(ra, State::Candidate, date(2010, 1, 1), None);
        let mut second = status(ra, State::Recorded, date(2010, 1, 1), None);
        second.created = first.created + Duration::minutes(5);
        let all = vec![second.clone(), first];
        assert_eq!(current_statuses(&all, None, date(2010, 1, 1)), vec![&second]);
    }

    #[test]
    fn authority_filter_restricts() {
        let ra1 = AuthorityId::new();
        let ra2 = AuthorityId::new();
        let all = vec![
            status(ra1, State::Standard, date(2000, 1, 1), None),
            status(ra2, State::Standard, date(2000, 1, 1), None),
        ];
        let only: BTreeSet<_> = [ra2].into_iter().collect();
        let current = current_statuses(&all, Some(&only), date(2001, 1, 1));
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].authority, ra2);

        let none = BTreeSet::new();
        assert!(current_statuses(&all, Some(&none), date(2001, 1, 1)).is_empty());
    }

    #[test]
    fn future_status_is_not_current() {
        let ra = AuthorityId::new();
        let all = vec![status(ra, State::Standard, date(2030, 1, 1), None)];
        assert!(current_statuses(&all, None, date(2029, 12, 31)).is_empty());
    }

    // ── Properties ────────────────────────────────────────────────

    fn arb_state() -> impl Strategy<Value = State> {
        (0usize..9).prop_map(|i| State::iter().nth(i).unwrap_or(State::Retired))
    }

    fn arb_status(authorities: Vec<AuthorityId>) -> impl Strategy<Value = Status> {
        (
            0..authorities.len(),
            arb_state(),
            0i64..3650,
            proptest::option::of(0i64..3650),
            0i64..10_000,
        )
            .prop_map(move |(ra, state, start, span, created)| {
                let base = date(2000, 1, 1);
                let from = base + Duration::days(start);
                Status {
                    id: StatusId::new(),
                    item: ItemId::new(),
                    authority: authorities[ra],
                    state,
                    registration_date: from,
                    until_date: span.map(|s| from + Duration::days(s)),
                    change_details: String::new(),
                    created: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
                        + Duration::seconds(created),
                }
            })
    }

    proptest! {
        #[test]
        fn at_most_one_current_per_authority(
            statuses in proptest::collection::vec(
                arb_status((0..4).map(|_| AuthorityId::new()).collect()),
                0..24,
            ),
            offset in 0i64..4000,
        ) {
            let when = date(2000, 1, 1) + Duration::days(offset);
            let current = current_statuses(&statuses, None, when);
            let distinct: BTreeSet<_> = current.iter().map(|s| s.authority).collect();
            prop_assert_eq!(distinct.len(), current.len());
            for s in &current {
                prop_assert!(s.is_valid_on(when));
                // No other valid status for the same authority outranks it.
                for other in statuses.iter().filter(|o| o.authority == s.authority && o.is_valid_on(when)) {
                    prop_assert!(precedence(other) <= precedence(s));
                }
            }
        }
    }
}
