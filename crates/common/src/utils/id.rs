use uuid::Uuid;

/// Generate a time-sortable edge identifier (UUID v7)
pub fn generate_edge_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generate a unique request identifier (UUID v7)
pub fn generate_request_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_request_id_format() {
        let request_id = generate_request_id();

        assert_eq!(request_id.len(), 36); // 32 hex chars + 4 hyphens
        assert_eq!(request_id.chars().filter(|&c| c == '-').count(), 4);

        let uuid = Uuid::parse_str(&request_id).unwrap();
        assert_eq!(uuid.get_version_num(), 7);
    }

    #[test]
    fn test_generate_request_id_uniqueness() {
        let mut ids = HashSet::new();

        for _ in 0..1000 {
            let id = generate_request_id();
            assert!(ids.insert(id), "Generated duplicate request ID");
        }
    }

    #[test]
    fn test_edge_ids_sort_by_creation_time() {
        let first = generate_edge_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generate_edge_id();
        assert!(first < second);
    }
}
