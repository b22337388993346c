use rand::Rng;

pub const DEFAULT_ORDER_PREFIX: &str = "NOV";
const ORDER_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ORDER_CODE_LENGTH: usize = 6;

/// `PREFIX-XXXXXX` with six characters from `A-Z0-9`.
pub fn generate_order_code(prefix: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_CODE_LENGTH)
        .map(|_| ORDER_CODE_ALPHABET[rng.gen_range(0..ORDER_CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", prefix.unwrap_or(DEFAULT_ORDER_PREFIX), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prefix_and_shape() {
        let code = generate_order_code(None);
        let (prefix, suffix) = code.split_once('-').unwrap();
        assert_eq!(prefix, "NOV");
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_partner_prefix() {
        assert!(generate_order_code(Some("LDC")).starts_with("LDC-"));
    }
}
