use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Dollar value of a one-point move for one contract of a futures root symbol.
///
/// Unknown symbols are valued like MNQ.
pub fn point_value(symbol: &str) -> Decimal {
    match symbol.trim().to_uppercase().as_str() {
        "MNQ" => dec!(2),
        "NQ" => dec!(20),
        "MES" => dec!(5),
        "ES" => dec!(50),
        "MYM" => dec!(0.5),
        "YM" => dec!(5),
        "M2K" => dec!(5),
        "RTY" => dec!(50),
        _ => dec!(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_roots() {
        assert_eq!(point_value("es"), dec!(50));
        assert_eq!(point_value("MYM"), dec!(0.5));
        assert_eq!(point_value("CL"), dec!(2));
    }
}
