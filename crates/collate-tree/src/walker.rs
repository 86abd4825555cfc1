//! Recursive walks over [`ResultTree`]s.
//!
//! A master tree is a template whose every leaf has gained a leading row
//! axis. [`expand`] builds one, [`insert`] writes a shard into one row,
//! [`concat_rows`] and [`row`] stack and slice along the row axis.

use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};

use crate::error::{TreeError, TreeResult};
use crate::tree::ResultTree;

/// Copy the structure of `template`, replacing each leaf of shape `S` with
/// zeros of shape `(n,) + S`.
pub fn expand(template: &ResultTree, n: usize) -> ResultTree {
    match template {
        ResultTree::Leaf(array) => {
            let mut shape = Vec::with_capacity(array.ndim() + 1);
            shape.push(n);
            shape.extend_from_slice(array.shape());
            ResultTree::Leaf(ArrayD::zeros(IxDyn(&shape)))
        }
        ResultTree::Node(map) => ResultTree::Node(
            map.iter()
                .map(|(key, child)| (key.clone(), expand(child, n)))
                .collect(),
        ),
    }
}

/// Assign `shard` into row `idx` of `master`, in place.
///
/// Every key of `master` must be present in `shard` with a leaf whose shape
/// equals the master's per-row shape. Keys only the shard has are ignored.
/// The whole shard is checked before any row is written, so a mismatch
/// leaves `master` untouched.
pub fn insert(master: &mut ResultTree, shard: &ResultTree, idx: usize) -> TreeResult<()> {
    check(master, shard, idx, &mut String::new())?;
    assign(master, shard, idx);
    Ok(())
}

fn check(master: &ResultTree, shard: &ResultTree, idx: usize, path: &mut String) -> TreeResult<()> {
    match (master, shard) {
        (ResultTree::Node(master_map), ResultTree::Node(shard_map)) => {
            for (key, master_child) in master_map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(key);

                let shard_child = shard_map.get(key).ok_or_else(|| mismatch(path, "key missing from shard"))?;
                check(master_child, shard_child, idx, path)?;
                path.truncate(len);
            }
            Ok(())
        }
        (ResultTree::Leaf(master_leaf), ResultTree::Leaf(shard_leaf)) => {
            let shape = master_leaf.shape();
            let Some((&rows, row_shape)) = shape.split_first() else {
                return Err(mismatch(path, "master leaf has no row axis"));
            };
            if idx >= rows {
                return Err(mismatch(path, &format!("row {idx} outside 0..{rows}")));
            }
            if row_shape != shard_leaf.shape() {
                return Err(mismatch(
                    path,
                    &format!("shard shape {:?} differs from row shape {:?}", shard_leaf.shape(), row_shape),
                ));
            }
            Ok(())
        }
        (ResultTree::Node(_), ResultTree::Leaf(_)) => Err(mismatch(path, "expected mapping, found array")),
        (ResultTree::Leaf(_), ResultTree::Node(_)) => Err(mismatch(path, "expected array, found mapping")),
    }
}

fn assign(master: &mut ResultTree, shard: &ResultTree, idx: usize) {
    match (master, shard) {
        (ResultTree::Node(master_map), ResultTree::Node(shard_map)) => {
            for (key, master_child) in master_map.iter_mut() {
                if let Some(shard_child) = shard_map.get(key) {
                    assign(master_child, shard_child, idx);
                }
            }
        }
        (ResultTree::Leaf(master_leaf), ResultTree::Leaf(shard_leaf)) => {
            master_leaf.index_axis_mut(Axis(0), idx).assign(shard_leaf);
        }
        _ => {}
    }
}

/// Number of rows along the leading axis, taken from the first leaf.
/// `None` for a tree without leaves.
pub fn rows(tree: &ResultTree) -> Option<usize> {
    match tree {
        ResultTree::Leaf(array) => array.shape().first().copied(),
        ResultTree::Node(map) => map.values().find_map(rows),
    }
}

/// Extract row `idx` of every leaf as a standalone tree.
pub fn row(tree: &ResultTree, idx: usize) -> TreeResult<ResultTree> {
    row_at(tree, idx, &mut String::new())
}

fn row_at(tree: &ResultTree, idx: usize, path: &mut String) -> TreeResult<ResultTree> {
    match tree {
        ResultTree::Leaf(array) => {
            let rows = array.shape().first().copied().unwrap_or(0);
            if array.ndim() == 0 || idx >= rows {
                return Err(mismatch(path, &format!("row {idx} outside 0..{rows}")));
            }
            Ok(ResultTree::Leaf(array.index_axis(Axis(0), idx).to_owned()))
        }
        ResultTree::Node(map) => {
            let mut out = BTreeMap::new();
            for (key, child) in map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(key);
                out.insert(key.clone(), row_at(child, idx, path)?);
                path.truncate(len);
            }
            Ok(ResultTree::Node(out))
        }
    }
}

/// Stack `parts` along the row axis, in order. All parts must share the
/// structure of the first and agree on per-row shapes.
pub fn concat_rows(parts: &[ResultTree]) -> TreeResult<ResultTree> {
    let first = parts.first().ok_or(TreeError::Empty)?;
    concat_at(first, parts, &mut String::new())
}

fn concat_at(first: &ResultTree, parts: &[ResultTree], path: &mut String) -> TreeResult<ResultTree> {
    match first {
        ResultTree::Leaf(_) => {
            let views = parts
                .iter()
                .map(|part| match part {
                    ResultTree::Leaf(array) if array.ndim() > 0 => Ok(array.view()),
                    ResultTree::Leaf(_) => Err(mismatch(path, "leaf has no row axis")),
                    ResultTree::Node(_) => Err(mismatch(path, "expected array, found mapping")),
                })
                .collect::<TreeResult<Vec<ArrayViewD<'_, f64>>>>()?;
            let stacked = ndarray::concatenate(Axis(0), &views)
                .map_err(|e| mismatch(path, &format!("cannot stack rows: {e}")))?;
            Ok(ResultTree::Leaf(stacked))
        }
        ResultTree::Node(map) => {
            let mut out = BTreeMap::new();
            for (key, child) in map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(key);

                let children = parts
                    .iter()
                    .map(|part| match part {
                        ResultTree::Node(part_map) => part_map
                            .get(key)
                            .cloned()
                            .ok_or_else(|| mismatch(path, "key missing from part")),
                        ResultTree::Leaf(_) => Err(mismatch(path, "expected mapping, found array")),
                    })
                    .collect::<TreeResult<Vec<_>>>()?;
                out.insert(key.clone(), concat_at(child, &children, path)?);
                path.truncate(len);
            }
            Ok(ResultTree::Node(out))
        }
    }
}

fn mismatch(path: &str, reason: &str) -> TreeError {
    TreeError::SchemaMismatch {
        path: if path.is_empty() { "<root>".into() } else { path.into() },
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array2};

    fn shard(x: f64) -> ResultTree {
        ResultTree::empty()
            .with("x", ResultTree::leaf(arr1(&[x])))
            .with(
                "nested",
                ResultTree::empty().with("m", ResultTree::leaf(arr2(&[[x, x], [x, x]]))),
            )
    }

    #[test]
    fn expand_adds_leading_axis() {
        let master = expand(&shard(1.0), 4);
        assert_eq!(master.get("x").unwrap().as_array().unwrap().shape(), &[4, 1]);
        assert_eq!(master.get("nested/m").unwrap().as_array().unwrap().shape(), &[4, 2, 2]);
        assert!(master.get("x").unwrap().as_array().unwrap().iter().all(|&v| v == 0.0));
        assert_eq!(rows(&master), Some(4));
    }

    #[test]
    fn expand_keeps_template_untouched() {
        let template = shard(7.0);
        let _ = expand(&template, 3);
        assert_eq!(template, shard(7.0));
    }

    #[test]
    fn insert_writes_one_row() {
        let mut master = expand(&shard(0.0), 3);
        insert(&mut master, &shard(5.0), 1).unwrap();

        let x = master.get("x").unwrap().as_array().unwrap();
        assert_eq!(x.clone().into_shape((3, 1)).unwrap(), arr2(&[[0.0], [5.0], [0.0]]));
        let m = master.get("nested/m").unwrap().as_array().unwrap();
        assert_eq!(m.index_axis(Axis(0), 1), Array2::from_elem((2, 2), 5.0).into_dyn());
        assert!(m.index_axis(Axis(0), 2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn insert_missing_key_is_schema_mismatch() {
        let mut master = expand(&shard(0.0), 2);
        let partial = ResultTree::empty().with("x", ResultTree::leaf(arr1(&[1.0])));
        let err = insert(&mut master, &partial, 0).unwrap_err();
        match err {
            TreeError::SchemaMismatch { path, .. } => assert_eq!(path, "nested"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn insert_shape_mismatch_leaves_master_untouched() {
        let mut master = expand(&shard(0.0), 2);
        let before = master.clone();
        // "nested/m" sorts before "x"; make only the later leaf wrong.
        let bad = ResultTree::empty()
            .with("x", ResultTree::leaf(arr1(&[1.0, 2.0])))
            .with(
                "nested",
                ResultTree::empty().with("m", ResultTree::leaf(arr2(&[[9.0, 9.0], [9.0, 9.0]]))),
            );
        let err = insert(&mut master, &bad, 0).unwrap_err();
        assert!(matches!(err, TreeError::SchemaMismatch { ref path, .. } if path == "x"));
        assert_eq!(master, before);
    }

    #[test]
    fn insert_row_out_of_range() {
        let mut master = expand(&shard(0.0), 2);
        let err = insert(&mut master, &shard(1.0), 2).unwrap_err();
        assert!(matches!(err, TreeError::SchemaMismatch { .. }));
    }

    #[test]
    fn insert_ignores_extra_shard_keys() {
        let mut master = expand(&ResultTree::empty().with("x", ResultTree::leaf(arr1(&[0.0]))), 1);
        let extra = ResultTree::empty()
            .with("x", ResultTree::leaf(arr1(&[3.0])))
            .with("y", ResultTree::leaf(arr1(&[4.0])));
        insert(&mut master, &extra, 0).unwrap();
        assert!(master.get("y").is_none());
        let x: Vec<f64> = master.get("x").unwrap().as_array().unwrap().iter().copied().collect();
        assert_eq!(x, vec![3.0]);
    }

    #[test]
    fn concat_then_row_recovers_parts() {
        let mut a = expand(&shard(0.0), 2);
        insert(&mut a, &shard(1.0), 0).unwrap();
        insert(&mut a, &shard(2.0), 1).unwrap();
        let mut b = expand(&shard(0.0), 1);
        insert(&mut b, &shard(3.0), 0).unwrap();

        let stacked = concat_rows(&[a, b]).unwrap();
        assert_eq!(rows(&stacked), Some(3));
        assert_eq!(row(&stacked, 2).unwrap(), shard(3.0));
        assert_eq!(row(&stacked, 0).unwrap(), shard(1.0));
        assert!(row(&stacked, 3).is_err());
    }

    #[test]
    fn concat_rejects_disagreeing_parts() {
        let a = expand(&shard(0.0), 1);
        let b = expand(&ResultTree::empty().with("x", ResultTree::leaf(arr1(&[0.0]))), 1);
        assert!(matches!(concat_rows(&[a, b]), Err(TreeError::SchemaMismatch { .. })));
        assert!(matches!(concat_rows(&[]), Err(TreeError::Empty)));
    }
}
