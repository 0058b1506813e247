use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::LOCAL_ID_PREFIX;

/// Length of the random tail on generated ids.
const RANDOM_SUFFIX_LEN: usize = 9;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// `local_<unix-millis>_<9 base-36 chars>`
pub fn local_visit_id(now: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}",
        LOCAL_ID_PREFIX,
        now.timestamp_millis(),
        random_base36(RANDOM_SUFFIX_LEN)
    )
}

/// `<unix-millis><9 base-36 chars>`
pub fn new_user_id(now: DateTime<Utc>) -> String {
    format!("{}{}", now.timestamp_millis(), random_base36(RANDOM_SUFFIX_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::is_local_id;

    #[test]
    fn test_local_visit_id_shape() {
        let now = Utc::now();
        let id = local_visit_id(now);
        assert!(is_local_id(&id));

        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), RANDOM_SUFFIX_LEN);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_ids_do_not_collide() {
        let now = Utc::now();
        assert_ne!(local_visit_id(now), local_visit_id(now));
        assert_ne!(new_user_id(now), new_user_id(now));
    }
}
