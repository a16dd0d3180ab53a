//! Property-based tests for objsync
//!
//! These tests verify invariants that must hold for all inputs:
//! - The path mapper never panics, always emits forward-slash keys, and
//!   never lets a path escape the watched root
//! - The queue tracks a FIFO-with-replacement model exactly and never
//!   exceeds its capacity
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// PATH MAPPER INVARIANTS
// ============================================================================

mod mapper_props {
    use super::*;
    use objsync::mapper::PathMapper;
    use std::path::Path;

    proptest! {
        /// Invariant: mapping never panics on any string input
        #[test]
        fn never_panics(s in ".*") {
            let mapper = PathMapper::new("/data", "");
            let _ = mapper.map(Path::new(&s));
        }

        /// Invariant: components under the root join with forward slashes
        #[test]
        fn keys_are_slash_joined(
            parts in prop::collection::vec("[a-zA-Z0-9_-]{1,12}", 1..6)
        ) {
            let mapper = PathMapper::new("/data", "");
            let mut path = std::path::PathBuf::from("/data");
            for part in &parts {
                path.push(part);
            }
            let key = mapper.map(&path).unwrap();
            prop_assert_eq!(key, parts.join("/"));
        }

        /// Invariant: a non-empty prefix is prepended exactly once
        #[test]
        fn prefix_prepended(
            prefix in "[a-z0-9]{0,12}",
            name in "[a-z0-9]{1,12}"
        ) {
            let mapper = PathMapper::new("/data", prefix.clone());
            let key = mapper.map(&Path::new("/data").join(&name)).unwrap();
            if prefix.is_empty() {
                prop_assert_eq!(key, name);
            } else {
                prop_assert_eq!(key, format!("{prefix}/{name}"));
            }
        }

        /// Invariant: paths outside the root are always rejected
        #[test]
        fn outside_root_rejected(name in "[a-z0-9]{1,12}") {
            let mapper = PathMapper::new("/data", "");
            prop_assert!(mapper.map(&Path::new("/elsewhere").join(&name)).is_err());
        }

        /// Invariant: keys never contain backslashes or empty segments
        #[test]
        fn keys_are_clean(
            parts in prop::collection::vec("[a-zA-Z0-9_-]{1,8}", 1..5)
        ) {
            let mapper = PathMapper::new("/data", "backup");
            let mut path = std::path::PathBuf::from("/data");
            for part in &parts {
                path.push(part);
            }
            let key = mapper.map(&path).unwrap();
            prop_assert!(!key.contains('\\'));
            prop_assert!(!key.contains("//"));
            prop_assert!(!key.starts_with('/'));
            prop_assert!(!key.ends_with('/'));
        }
    }
}

// ============================================================================
// QUEUE MODEL EQUIVALENCE
// ============================================================================

mod queue_props {
    use super::*;
    use objsync::queue::UploadQueue;
    use objsync::UploadIntent;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    proptest! {
        /// The queue behaves exactly like a FIFO with per-path replacement:
        /// same length, same pop order, capacity never exceeded.
        #[test]
        fn matches_fifo_dedup_model(
            ops in prop::collection::vec((0usize..6, any::<bool>()), 1..40),
            cap in 1usize..6
        ) {
            tokio_test::block_on(async {
                let queue = UploadQueue::new(cap);
                let mut model: VecDeque<usize> = VecDeque::new();

                for (idx, do_pop) in ops {
                    if do_pop {
                        if let Some(expect) = model.pop_front() {
                            let intent = queue.pop().await.unwrap();
                            prop_assert_eq!(
                                intent.path,
                                PathBuf::from(format!("/data/f{expect}"))
                            );
                        }
                    } else {
                        let queued = model.contains(&idx);
                        // Only push when the model says it cannot block
                        if queued || model.len() < cap {
                            queue
                                .push(UploadIntent::new(
                                    format!("/data/f{idx}"),
                                    format!("f{idx}"),
                                ))
                                .await
                                .unwrap();
                            if !queued {
                                model.push_back(idx);
                            }
                        }
                    }
                    prop_assert_eq!(queue.len(), model.len());
                    prop_assert!(queue.len() <= cap);
                }
                Ok(())
            })?;
        }
    }
}
