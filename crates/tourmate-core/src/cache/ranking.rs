use std::cmp::Ordering;

use crate::models::CatalogItem;

/// Featured items first, then by composite score, highest first. Stable, so
/// ties keep collection order. `total_cmp` keeps the order total even if a
/// NaN score slips through.
fn rank<T: CatalogItem>(a: &T, b: &T) -> Ordering {
    b.is_featured()
        .cmp(&a.is_featured())
        .then_with(|| b.popularity_score().total_cmp(&a.popularity_score()))
}

/// Top `limit` items by [`rank`].
pub fn popular<T: CatalogItem>(items: &[T], limit: usize) -> Vec<T> {
    let mut ranked = items.to_vec();
    ranked.sort_by(rank);
    ranked.truncate(limit);
    ranked
}

/// Up to `limit` featured items in collection order. With nothing flagged,
/// falls back to the top of the popularity ranking.
pub fn featured<T: CatalogItem>(items: &[T], limit: usize) -> Vec<T> {
    let flagged: Vec<T> = items
        .iter()
        .filter(|item| item.is_featured())
        .take(limit)
        .cloned()
        .collect();
    if flagged.is_empty() {
        popular(items, limit)
    } else {
        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Destination;
    use serde_json::json;

    fn dest(id: &str, rating: f64, reviews: u32, featured: bool) -> Destination {
        serde_json::from_value(json!({
            "id": id,
            "rating": rating,
            "review_count": reviews,
            "featured": featured
        }))
        .expect("destination")
    }

    fn ids(items: &[Destination]) -> Vec<&str> {
        items.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_featured_keeps_collection_order() {
        let items = vec![
            dest("a", 5.0, 100, false),
            dest("b", 1.0, 0, true),
            dest("c", 2.0, 0, true),
            dest("d", 3.0, 0, true),
        ];
        assert_eq!(ids(&featured(&items, 2)), vec!["b", "c"]);
    }

    #[test]
    fn test_featured_falls_back_to_score() {
        let items = vec![
            dest("low", 3.0, 2, false),
            dest("many-reviews", 3.5, 400, false),
            dest("high", 5.0, 10, false),
        ];
        // 0.7*3.5 + 0.3*100 = 32.45, 0.7*5 + 0.3*10 = 6.5, 0.7*3 + 0.3*2 = 2.7
        assert_eq!(ids(&featured(&items, 2)), vec!["many-reviews", "high"]);
        assert_eq!(featured(&items, 2), popular(&items, 2));
    }

    #[test]
    fn test_popular_puts_featured_first() {
        let items = vec![dest("top", 5.0, 100, false), dest("promo", 1.0, 0, true)];
        assert_eq!(ids(&popular(&items, 5)), vec!["promo", "top"]);
    }

    #[test]
    fn test_non_finite_ratings_do_not_break_ranking() {
        let items: Vec<Destination> = (0..64)
            .map(|i| {
                let rating = if i % 3 == 0 { json!("NaN") } else { json!(format!("{}", i % 5)) };
                serde_json::from_value(json!({
                    "id": format!("d{}", i),
                    "rating": rating,
                    "review_count": i
                }))
                .expect("destination")
            })
            .collect();

        let top = popular(&items, 5);
        assert_eq!(top.len(), 5);
        assert!(items.iter().all(|d| d.rating.is_finite()));
        assert_eq!(items[0].rating, 0.0);

        let inf: Destination =
            serde_json::from_value(json!({"id": "x", "rating": "inf"})).expect("destination");
        assert_eq!(inf.rating, 0.0);

        let mut direct: Vec<Destination> = (0..64).map(|i| dest(&format!("n{}", i), 4.0, i, false)).collect();
        for d in direct.iter_mut().step_by(3) {
            d.rating = f64::NAN;
        }
        assert_eq!(popular(&direct, 5).len(), 5);
    }

    #[test]
    fn test_empty_collection() {
        let items: Vec<Destination> = Vec::new();
        assert!(featured(&items, 3).is_empty());
    }
}
