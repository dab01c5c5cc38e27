use crate::columns::{ColumnSlice, DenseArray, RaggedField};
use crate::error::Result;

/// A fixed-size group of rows ready for the training/serving consumer.
///
/// Labels and reserve columns are kept as dense per-row arrays. All ragged
/// fields are flattened, in configured order, into a single [`feature`](Self::feature)
/// pair: the lengths of field `k` occupy `lengths[k * rows .. (k + 1) * rows]`
/// and its values follow the values of fields `0..k`.
///
/// # Examples
/// With two ragged fields `a` and `b` and 2 rows:
/// - `a` rows: `[1]`, `[2, 3]`
/// - `b` rows: `[7]`, `[]`
///
/// the batch carries `feature.lengths = [1, 2, 1, 0]` and
/// `feature.values = [1, 2, 3, 7]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    num_rows: usize,
    labels: Vec<(String, Vec<f32>)>,
    feature: RaggedField,
    feature_fields: Vec<String>,
    reserve: Vec<(String, DenseArray)>,
}

/// Borrowed view of one named batch column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchField<'a> {
    Label(&'a [f32]),
    Feature(&'a RaggedField),
    Reserve(&'a DenseArray),
}

impl Batch {
    /// Name of the aggregated ragged column.
    pub const FEATURE: &'static str = "feature";

    /// Validates and flattens a slice of rows into a batch.
    pub(crate) fn from_slice(slice: ColumnSlice) -> Result<Self> {
        slice.validate()?;
        let (num_rows, labels, ragged, reserve) = slice.into_parts();
        let feature_fields = ragged.iter().map(|(name, _)| name.clone()).collect();
        let feature = RaggedField::concat(ragged.into_iter().map(|(_, field)| field));
        feature.validate(Self::FEATURE)?;

        Ok(Self {
            num_rows,
            labels,
            feature,
            feature_fields,
            reserve,
        })
    }

    /// Returns the number of rows in the batch.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns the label column with the given name.
    pub fn label(&self, name: &str) -> Option<&[f32]> {
        self.labels
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn labels(&self) -> &[(String, Vec<f32>)] {
        &self.labels
    }

    /// The flattened ragged features.
    pub fn feature(&self) -> &RaggedField {
        &self.feature
    }

    /// Names of the ragged fields flattened into `feature`, in order.
    pub fn feature_fields(&self) -> &[String] {
        &self.feature_fields
    }

    pub fn reserve(&self, name: &str) -> Option<&DenseArray> {
        self.reserve.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn reserves(&self) -> &[(String, DenseArray)] {
        &self.reserve
    }

    /// Looks up any column by name, including `feature`.
    pub fn get(&self, name: &str) -> Option<BatchField<'_>> {
        if name == Self::FEATURE {
            return Some(BatchField::Feature(&self.feature));
        }
        self.label(name)
            .map(BatchField::Label)
            .or_else(|| self.reserve(name).map(BatchField::Reserve))
    }

    /// Returns all column names: labels, then `feature`, then reserve columns.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.labels
            .iter()
            .map(|(n, _)| n.as_str())
            .chain(std::iter::once(Self::FEATURE))
            .chain(self.reserve.iter().map(|(n, _)| n.as_str()))
    }

    /// Recovers ragged field `index` from the flattened `feature` pair.
    pub fn feature_field(&self, index: usize) -> Option<RaggedField> {
        if index >= self.feature_fields.len() {
            return None;
        }
        let lengths = self.feature.lengths();
        let start = index * self.num_rows;
        let end = start + self.num_rows;
        if end > lengths.len() {
            return None;
        }
        let sum = |ls: &[i32]| ls.iter().map(|&l| l.max(0) as usize).sum::<usize>();
        let value_start = sum(&lengths[..start]);
        let value_end = value_start + sum(&lengths[start..end]);
        let values = self.feature.values().get(value_start..value_end)?;

        Some(RaggedField::from_parts_unchecked(
            lengths[start..end].to_vec(),
            values.to_vec(),
        ))
    }

    /// Splits `feature` back into its per-field parts.
    pub fn split_feature(&self) -> Vec<(String, RaggedField)> {
        self.feature_fields
            .iter()
            .enumerate()
            .filter_map(|(i, name)| self.feature_field(i).map(|f| (name.clone(), f)))
            .collect()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Vec<(String, Vec<f32>)>,
        RaggedField,
        Vec<(String, DenseArray)>,
    ) {
        (self.labels, self.feature, self.reserve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    fn two_field_slice() -> ColumnSlice {
        ColumnSlice::new(2)
            .with_label("click", vec![1.0, 0.0])
            .unwrap()
            .with_ragged("a", RaggedField::from_rows([vec![1], vec![2, 3]]))
            .unwrap()
            .with_ragged("b", RaggedField::from_rows([vec![7], vec![]]))
            .unwrap()
            .with_reserve("sid", DenseArray::Utf8(vec!["x".into(), "y".into()]))
            .unwrap()
    }

    #[test]
    fn test_feature_flattening_order() {
        let batch = Batch::from_slice(two_field_slice()).unwrap();

        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.feature().lengths(), &[1, 2, 1, 0]);
        assert_eq!(batch.feature().values(), &[1, 2, 3, 7]);
        assert_eq!(batch.label("click"), Some(&[1.0, 0.0][..]));
        assert!(batch.label("missing").is_none());

        let names: Vec<&str> = batch.field_names().collect();
        assert_eq!(names, vec!["click", "feature", "sid"]);
    }

    #[test]
    fn test_split_feature_recovers_fields() {
        let batch = Batch::from_slice(two_field_slice()).unwrap();
        let fields = batch.split_feature();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].0, "a");
        assert_eq!(fields[0].1, RaggedField::from_rows([vec![1], vec![2, 3]]));
        assert_eq!(fields[1].1, RaggedField::from_rows([vec![7], vec![]]));
        assert!(batch.feature_field(2).is_none());
    }

    #[test]
    fn test_get_by_name() {
        let batch = Batch::from_slice(two_field_slice()).unwrap();
        assert!(matches!(batch.get("feature"), Some(BatchField::Feature(_))));
        assert!(matches!(batch.get("click"), Some(BatchField::Label(_))));
        assert!(matches!(batch.get("sid"), Some(BatchField::Reserve(_))));
        assert!(batch.get("a").is_none());
    }

    #[test]
    fn test_corrupt_field_is_rejected() {
        let slice = ColumnSlice::new(1)
            .with_ragged("a", RaggedField::from_parts_unchecked(vec![3], vec![1]))
            .unwrap();
        let err = Batch::from_slice(slice).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptInput { ref field, .. } if field == "a"));
    }
}
