const UNITS: [&str; 8] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB"];

/// Format a number of bytes as a base-2 storage quantity, e.g. `3.3 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut num = bytes as f64;
    for unit in UNITS {
        if num < 1024.0 {
            return format!("{num:.1} {unit}");
        }
        num /= 1024.0;
    }
    format!("{num:.1} YiB")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_unit_below_1024() {
        assert_eq!(format_bytes(0), "0.0 B");
        assert_eq!(format_bytes(1023), "1023.0 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }

    #[test]
    fn handles_largest_values() {
        assert_eq!(format_bytes(u64::MAX), "16.0 EiB");
    }
}
