use std::collections::VecDeque;

use proptest::prelude::*;

use crate::{FifoBuffer, FifoError};

#[derive(Debug, Clone)]
enum Op {
    Append(Vec<u8>),
    Consume(usize),
}

const CAPACITY: usize = 256;

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => prop::collection::vec(any::<u8>(), 1..=96).prop_map(Op::Append),
        2 => (0usize..=128).prop_map(Op::Consume),
    ]
}

proptest! {
    #[test]
    fn pending_bytes_match_a_queue_model(ops in prop::collection::vec(op_strategy(), 1..64)) {
        let mut fifo = FifoBuffer::new(CAPACITY);
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                Op::Append(data) => {
                    let fits = model.len() + data.len() <= CAPACITY;
                    match fifo.append(&data) {
                        Ok(()) => {
                            prop_assert!(fits);
                            model.extend(data.iter().copied());
                        }
                        Err(FifoError::CapacityExceeded { len, .. }) => {
                            prop_assert!(!fits);
                            prop_assert_eq!(len, data.len());
                            // A failed append compacts but never loses pending bytes.
                            prop_assert_eq!(fifo.read_offset(), 0);
                        }
                        Err(other) => prop_assert!(false, "unexpected error {other}"),
                    }
                }
                Op::Consume(n) => {
                    let n = n.min(model.len());
                    fifo.consume(n);
                    model.drain(..n);
                }
            }

            prop_assert!(fifo.read_offset() <= fifo.len());
            prop_assert!(fifo.len() <= fifo.capacity());
            let expected: Vec<u8> = model.iter().copied().collect();
            prop_assert_eq!(fifo.pending(), &expected[..]);
        }
    }
}
