use proptest::prelude::*;
use rxdose_core::{batch_count, split, Dataset, InputRow};

proptest! {
    #[test]
    fn batches_partition_the_dataset(cells in prop::collection::vec("[a-z0-9 ]{0,12}", 0..60), chunk_size in 1usize..15) {
        let rows = cells
            .iter()
            .map(|cell| InputRow::new(vec![cell.clone()]))
            .collect::<Vec<_>>();
        let dataset = Dataset::new(vec!["text".to_string()], rows.clone());
        let batches = split(&dataset, chunk_size).expect("split");

        prop_assert_eq!(batches.len(), batch_count(rows.len(), chunk_size));
        prop_assert_eq!(batches.len(), rows.len().div_ceil(chunk_size));
        for (idx, batch) in batches.iter().enumerate() {
            prop_assert_eq!(batch.index, idx);
            prop_assert!(!batch.is_empty());
            if idx + 1 < batches.len() {
                prop_assert_eq!(batch.len(), chunk_size);
            } else {
                prop_assert!(batch.len() <= chunk_size);
            }
        }

        let rejoined = batches
            .iter()
            .flat_map(|batch| batch.rows().iter().cloned())
            .collect::<Vec<_>>();
        prop_assert_eq!(rejoined, rows);
    }
}
