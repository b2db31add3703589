use crate::record::Record;
use anyhow::Result;

// ========== Core MapReduce traits ==========

/// Pull-based supplier of map work units.
pub trait DataSource: Send {
    type Key;
    type Value;

    /// Advances to the next unit of work; `None` once the source is exhausted.
    fn setup_key(&mut self) -> Option<Self::Key>;

    /// Fetches the unit for `key`. Must be repeatable for the same key.
    fn get_data(&mut self, key: &Self::Key) -> Result<Self::Value>;
}

pub trait MapTask: Sync {
    type Key;
    type Value;
    type IntermediateKey: Record + Send;
    type IntermediateValue: Record + Send;

    fn map<F>(&self, key: &Self::Key, value: &Self::Value, emit: &mut F)
    where
        F: FnMut(Self::IntermediateKey, Self::IntermediateValue);
}

/// Called once per distinct intermediate key with every value for that key,
/// values in ascending order.
pub trait ReduceTask: Sync {
    type Key: Record + Send;
    type Value: Record + Send;
    type OutputKey: Send;
    type OutputValue: Send;

    fn reduce<I, F>(&self, key: &Self::Key, values: I, emit: &mut F)
    where
        I: Iterator<Item = Self::Value>,
        F: FnMut(Self::OutputKey, Self::OutputValue);
}

/// Map-side pre-aggregation of values that share a key.
pub trait Combiner<K, V>: Sync {
    fn combine<F>(&self, key: &K, values: Vec<V>, emit: &mut F)
    where
        F: FnMut(V);

    /// A pass-through combiner lets the map side write pairs straight to the spill.
    fn is_pass_through(&self) -> bool {
        false
    }
}

/// Performs no aggregation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullCombiner;

impl<K, V> Combiner<K, V> for NullCombiner {
    fn combine<F>(&self, _key: &K, values: Vec<V>, emit: &mut F)
    where
        F: FnMut(V),
    {
        for v in values {
            emit(v);
        }
    }

    fn is_pass_through(&self) -> bool {
        true
    }
}
