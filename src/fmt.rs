/// Format a float as a dollar amount with thousands separators: $1,234.56
pub fn money(val: f64) -> String {
    let negative = val < 0.0;
    let cents = format!("{:.2}", val.abs());
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));
    let with_commas = group_thousands(int_part);

    if negative {
        format!("-${with_commas}.{dec_part}")
    } else {
        format!("${with_commas}.{dec_part}")
    }
}

/// Integer count with thousands separators: 12,345
pub fn count(n: usize) -> String {
    group_thousands(&n.to_string())
}

/// Count plus its share of `total`: "1,234 (12.3%)"
pub fn count_pct(n: usize, total: usize) -> String {
    let pct = if total == 0 {
        0.0
    } else {
        n as f64 / total as f64 * 100.0
    };
    format!("{} ({pct:.1}%)", count(n))
}

fn group_thousands(digits: &str) -> String {
    let mut with_commas = String::new();
    for (i, c) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    with_commas.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(1234.56), "$1,234.56");
        assert_eq!(money(-500.00), "-$500.00");
        assert_eq!(money(0.0), "$0.00");
        assert_eq!(money(1000000.99), "$1,000,000.99");
    }

    #[test]
    fn test_count_formatting() {
        assert_eq!(count(0), "0");
        assert_eq!(count(999), "999");
        assert_eq!(count(123456), "123,456");
    }

    #[test]
    fn test_count_pct() {
        assert_eq!(count_pct(1, 4), "1 (25.0%)");
        assert_eq!(count_pct(1500, 3000), "1,500 (50.0%)");
        assert_eq!(count_pct(0, 0), "0 (0.0%)");
    }
}
