//! Display formatting for prices, changes, and widget captions.

use tessera_content::{ChartSpec, DataCard};

/// Dollar price with two decimals, four below one dollar.
pub fn format_price(value: f64) -> String {
    let negative = value < 0.0;
    let magnitude = value.abs();
    let body = if magnitude < 1.0 {
        format!("{magnitude:.4}")
    } else {
        format!("{magnitude:.2}")
    };
    if negative {
        format!("-${body}")
    } else {
        format!("${body}")
    }
}

/// Signed percent change, always two decimals.
pub fn format_percent_change(value: f64) -> String {
    // Collapses -0.0 so flat changes never show a sign.
    let value = if value == 0.0 { 0.0 } else { value };
    if value > 0.0 {
        format!("+{value:.2}%")
    } else {
        format!("{value:.2}%")
    }
}

/// Compact large-number form: 1530000000 -> "1.53B".
pub fn format_compact(value: f64) -> String {
    let negative = value < 0.0;
    let magnitude = value.abs();
    let (scaled, suffix) = if magnitude >= 1e12 {
        (magnitude / 1e12, "T")
    } else if magnitude >= 1e9 {
        (magnitude / 1e9, "B")
    } else if magnitude >= 1e6 {
        (magnitude / 1e6, "M")
    } else if magnitude >= 1e3 {
        (magnitude / 1e3, "K")
    } else {
        (magnitude, "")
    };

    let body = if suffix.is_empty() {
        trim_decimal(format!("{scaled:.2}"))
    } else if scaled >= 100.0 {
        format!("{scaled:.0}")
    } else if scaled >= 10.0 {
        trim_decimal(format!("{scaled:.1}"))
    } else {
        trim_decimal(format!("{scaled:.2}"))
    };

    if negative {
        format!("-{body}{suffix}")
    } else {
        format!("{body}{suffix}")
    }
}

/// Human label for a chart range token; unknown tokens pass through.
pub fn range_label(range: &str) -> String {
    match range.to_ascii_uppercase().as_str() {
        "1D" => "1 day".to_string(),
        "5D" => "5 days".to_string(),
        "1M" => "1 month".to_string(),
        "3M" => "3 months".to_string(),
        "6M" => "6 months".to_string(),
        "YTD" => "year to date".to_string(),
        "1Y" => "1 year".to_string(),
        "5Y" => "5 years".to_string(),
        "MAX" => "max".to_string(),
        other => other.to_string(),
    }
}

pub fn chart_caption(spec: &ChartSpec) -> String {
    format!("{} {}", spec.symbol, spec.time_range)
}

/// Card title when present, otherwise its id.
pub fn card_caption(card: &DataCard) -> String {
    card.title()
        .map(str::to_string)
        .unwrap_or_else(|| card.id.clone())
}

fn trim_decimal(text: String) -> String {
    if !text.contains('.') {
        return text;
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tessera_content::CardKind;

    use super::*;

    #[test]
    fn prices() {
        assert_eq!(format_price(184.25), "$184.25");
        assert_eq!(format_price(184.256), "$184.26");
        assert_eq!(format_price(0.1234), "$0.1234");
        assert_eq!(format_price(-3.2), "-$3.20");
    }

    #[test]
    fn percent_changes() {
        assert_eq!(format_percent_change(2.345), "+2.35%");
        assert_eq!(format_percent_change(-1.2), "-1.20%");
        assert_eq!(format_percent_change(0.0), "0.00%");
        assert_eq!(format_percent_change(-0.0), "0.00%");
    }

    #[test]
    fn compact_numbers() {
        assert_eq!(format_compact(1_530_000_000.0), "1.53B");
        assert_eq!(format_compact(12_400_000.0), "12.4M");
        assert_eq!(format_compact(2_000_000.0), "2M");
        assert_eq!(format_compact(152_000_000_000.0), "152B");
        assert_eq!(format_compact(9_100.0), "9.1K");
        assert_eq!(format_compact(512.0), "512");
        assert_eq!(format_compact(-4_250_000.0), "-4.25M");
        assert_eq!(format_compact(1_200_000_000_000.0), "1.2T");
    }

    #[test]
    fn range_labels() {
        assert_eq!(range_label("1d"), "1 day");
        assert_eq!(range_label("YTD"), "year to date");
        assert_eq!(range_label("2W"), "2W");
    }

    #[test]
    fn captions() {
        let spec = ChartSpec::new("nvda", "1m");
        assert_eq!(chart_caption(&spec), "NVDA 1M");

        let titled = DataCard::new(CardKind::Article, "a1").with_field("title", "Chip outlook");
        assert_eq!(card_caption(&titled), "Chip outlook");

        let untitled = DataCard::new(CardKind::Event, "77");
        assert_eq!(card_caption(&untitled), "77");
    }
}
