//! Detection of producers signing two different blocks at one height

use std::collections::{BTreeMap, HashMap};

use kestrel_common::validation::StructuralError;
use kestrel_common::{Address, BlockHash, BlockHeader};

pub struct BifurcationDetector {
    /// height -> producer -> block signed
    seen: BTreeMap<u64, HashMap<Address, BlockHash>>,
    /// Heights older than the newest seen minus this are forgotten
    window: u64,
}

impl BifurcationDetector {
    pub fn new(window: u64) -> Self {
        Self {
            seen: BTreeMap::new(),
            window: window.max(1),
        }
    }

    /// Record the header's producer at its height, failing if the producer
    /// already signed a different block there
    pub fn validate(&mut self, header: &BlockHeader) -> Result<(), StructuralError> {
        let producers = self.seen.entry(header.height).or_default();
        match producers.get(&header.producer) {
            Some(first) if *first != header.hash => {
                return Err(StructuralError::Bifurcation {
                    producer: header.producer.clone(),
                    height: header.height,
                    first: *first,
                    second: header.hash,
                });
            }
            Some(_) => return Ok(()),
            None => {
                producers.insert(header.producer.clone(), header.hash);
            }
        }

        while let Some((&lowest, _)) = self.seen.first_key_value() {
            if lowest.saturating_add(self.window) >= header.height {
                break;
            }
            self.seen.pop_first();
        }
        Ok(())
    }

    pub fn heights_tracked(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::Block;

    fn header(height: u64, producer: u8, time: u64) -> BlockHeader {
        Block::new(height, BlockHash::default(), time, Address::new(vec![producer]), None, vec![])
            .header
    }

    #[test]
    fn same_producer_two_blocks_same_height_is_rejected() {
        let mut detector = BifurcationDetector::new(10);
        detector.validate(&header(5, 1, 100)).unwrap();
        assert!(matches!(
            detector.validate(&header(5, 1, 101)),
            Err(StructuralError::Bifurcation { height: 5, .. })
        ));
    }

    #[test]
    fn resubmission_and_other_producers_pass() {
        let mut detector = BifurcationDetector::new(10);
        let first = header(5, 1, 100);
        detector.validate(&first).unwrap();
        detector.validate(&first).unwrap();
        detector.validate(&header(5, 2, 100)).unwrap();
    }

    #[test]
    fn old_heights_are_forgotten() {
        let mut detector = BifurcationDetector::new(3);
        for height in 0..10 {
            detector.validate(&header(height, 1, height)).unwrap();
        }
        assert_eq!(detector.heights_tracked(), 4);
    }
}
