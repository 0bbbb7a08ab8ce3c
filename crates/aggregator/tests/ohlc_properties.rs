//! Property tests for the OHLCV fold and boundary promotion.

use aggregator::{BarAggregator, BarBuilder};
use chrono::DateTime;
use configuration::AggregatorConfig;
use core_types::Timeframe;
use proptest::prelude::*;
use rust_decimal::Decimal;

fn arb_tick() -> impl Strategy<Value = (Decimal, Decimal)> {
    (1i64..5_000_000, 0i64..10_000).prop_map(|(p, v)| (Decimal::new(p, 2), Decimal::from(v)))
}

proptest! {
    /// open is the first price, close the last, high/low the extremes, volume the sum.
    #[test]
    fn builder_matches_fold(ticks in prop::collection::vec(arb_tick(), 1..200)) {
        let start = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        let mut builder = BarBuilder::new("MNQ", Timeframe::parse("5m"), start);
        for (price, volume) in &ticks {
            builder.add_tick(*price, *volume, start);
        }
        let bar = builder.to_bar().unwrap();

        let prices: Vec<Decimal> = ticks.iter().map(|(p, _)| *p).collect();
        prop_assert_eq!(bar.open, prices[0]);
        prop_assert_eq!(bar.close, *prices.last().unwrap());
        prop_assert_eq!(bar.high, *prices.iter().max().unwrap());
        prop_assert_eq!(bar.low, *prices.iter().min().unwrap());
        prop_assert_eq!(bar.volume, ticks.iter().map(|(_, v)| *v).sum::<Decimal>());
        prop_assert_eq!(bar.tick_count, ticks.len() as u64);
        prop_assert!(bar.low <= bar.open && bar.open <= bar.high);
        prop_assert!(bar.low <= bar.close && bar.close <= bar.high);
    }

    /// Ticks in bucket A followed by one tick past its end complete A exactly once.
    #[test]
    fn crossing_a_boundary_completes_the_previous_bucket(
        first in prop::collection::vec(arb_tick(), 1..50),
        offsets in prop::collection::vec(0i64..300, 1..50),
        jump in 300i64..3_000,
        next in arb_tick(),
    ) {
        let config = AggregatorConfig {
            default_timeframes: vec!["5m".to_string()],
            ..AggregatorConfig::default()
        };
        let agg = BarAggregator::new(&config, None);
        let bucket = 1_700_000_100i64;

        let n = first.len().min(offsets.len());
        for i in 0..n {
            let ts = DateTime::from_timestamp(bucket + offsets[i], 0).unwrap();
            agg.add_quote("MNQ", first[i].0, first[i].1, Some(ts));
        }
        let before = agg.get_current_bar("MNQ", "5m").unwrap();

        let t1 = DateTime::from_timestamp(bucket + jump, 0).unwrap();
        agg.add_quote("MNQ", next.0, next.1, Some(t1));

        let completed = agg.get_last_completed_bar("MNQ", "5m").unwrap();
        prop_assert_eq!(&completed, &before);
        prop_assert_eq!(completed.tick_count, n as u64);

        let live = agg.get_current_bar("MNQ", "5m").unwrap();
        prop_assert_eq!(live.timestamp, Timeframe::parse("5m").bucket_start(t1));
        prop_assert_eq!(live.tick_count, 1);
        prop_assert_eq!(live.open, next.0);
    }
}
