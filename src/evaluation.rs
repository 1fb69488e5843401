use std::fmt;

use burn::{data::dataloader::DataLoader, prelude::*};

use crate::{data::Cifar10Batch, model::Model, CLASSES};

/// Correct and total prediction counts per class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccuracyCounters {
    correct: Vec<usize>,
    total: Vec<usize>,
}

impl AccuracyCounters {
    pub fn new() -> Self {
        Self {
            correct: vec![0; CLASSES.len()],
            total: vec![0; CLASSES.len()],
        }
    }

    pub fn record(&mut self, label: usize, prediction: usize) {
        if label == prediction {
            self.correct[label] += 1;
        }
        self.total[label] += 1;
    }

    pub fn correct(&self, class: usize) -> usize {
        self.correct[class]
    }

    pub fn total(&self, class: usize) -> usize {
        self.total[class]
    }

    pub fn correct_count(&self) -> usize {
        self.correct.iter().sum()
    }

    pub fn total_count(&self) -> usize {
        self.total.iter().sum()
    }

    /// Truncated integer percentage, `None` before anything was recorded.
    pub fn overall_percent(&self) -> Option<usize> {
        match self.total_count() {
            0 => None,
            total => Some(100 * self.correct_count() / total),
        }
    }

    /// `None` when the class never appeared.
    pub fn class_percent(&self, class: usize) -> Option<f64> {
        match self.total[class] {
            0 => None,
            total => Some(100.0 * self.correct[class] as f64 / total as f64),
        }
    }
}

impl Default for AccuracyCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccuracyCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Accuracy of the network on the {} test images: ",
            self.total_count()
        )?;
        match self.overall_percent() {
            Some(percent) => writeln!(f, "{percent} %")?,
            None => writeln!(f, "undefined")?,
        }

        for (class, name) in CLASSES.iter().enumerate() {
            write!(f, "Accuracy for class {name:5} is: ")?;
            match self.class_percent(class) {
                Some(percent) => writeln!(f, "{percent:.1} %")?,
                None => writeln!(f, "undefined")?,
            }
        }

        Ok(())
    }
}

/// Runs `model` over every batch once and counts hits per true class.
///
/// Meant for a backend without autodiff, so no graph is recorded.
pub fn evaluate<B: Backend>(
    model: &Model<B>,
    dataloader: &dyn DataLoader<Cifar10Batch<B>>,
) -> AccuracyCounters {
    let mut counters = AccuracyCounters::new();

    for batch in dataloader.iter() {
        let output = model.forward(batch.images);
        let predictions: Tensor<B, 1, Int> = output.argmax(1).flatten(0, 1);

        let predictions = predictions.into_data();
        let targets = batch.targets.into_data();

        for (label, prediction) in targets.iter::<i64>().zip(predictions.iter::<i64>()) {
            counters.record(label as usize, prediction as usize);
        }
    }

    counters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{dataloader, tests::item_with_label, Cifar10Batcher, Cifar10Dataset},
        model::ModelConfig,
    };
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn overall_percent_is_truncated() {
        let mut counters = AccuracyCounters::new();
        counters.record(0, 0);
        counters.record(1, 1);
        counters.record(2, 3);

        assert_eq!(counters.correct_count(), 2);
        assert_eq!(counters.total_count(), 3);
        assert_eq!(counters.overall_percent(), Some(66));
    }

    #[test]
    fn counts_misses_against_the_true_class() {
        let mut counters = AccuracyCounters::new();
        counters.record(4, 4);
        counters.record(4, 5);
        counters.record(4, 4);
        counters.record(4, 4);

        assert_eq!(counters.correct(4), 3);
        assert_eq!(counters.total(4), 4);
        assert_eq!(counters.total(5), 0);
        assert_eq!(counters.class_percent(4), Some(75.0));
    }

    #[test]
    fn absent_classes_have_no_percentage() {
        let counters = AccuracyCounters::new();

        assert_eq!(counters.overall_percent(), None);
        assert!((0..CLASSES.len()).all(|class| counters.class_percent(class).is_none()));
    }

    #[test]
    fn report_lists_every_class_in_order() {
        let mut counters = AccuracyCounters::new();
        for class in 0..CLASSES.len() {
            counters.record(class, class);
            counters.record(class, (class + 1) % CLASSES.len());
        }
        counters.record(0, 0);

        let report = counters.to_string();
        let lines: Vec<&str> = report.lines().collect();

        assert_eq!(lines.len(), 11);
        assert_eq!(
            lines[0],
            "Accuracy of the network on the 21 test images: 52 %"
        );
        assert_eq!(lines[1], "Accuracy for class plane is: 66.7 %");
        assert_eq!(lines[2], "Accuracy for class car   is: 50.0 %");
        assert_eq!(lines[10], "Accuracy for class truck is: 50.0 %");
    }

    #[test]
    fn report_marks_empty_classes_undefined() {
        let mut counters = AccuracyCounters::new();
        counters.record(3, 3);

        let report = counters.to_string();

        assert!(report.contains("Accuracy for class cat   is: 100.0 %"));
        assert!(report.contains("Accuracy for class dog   is: undefined"));
    }

    #[test]
    fn evaluation_counts_every_sample() {
        let device = Default::default();
        let model = ModelConfig::new(10).init::<TestBackend>(&device);
        let items = (0..10).chain(0..3).map(item_with_label).collect();
        let loader = dataloader(
            Cifar10Batcher::<TestBackend>::new(device),
            Cifar10Dataset::from_items(items),
            4,
            None,
            0,
        );

        let counters = evaluate(&model, loader.as_ref());

        assert_eq!(counters.total_count(), 13);
        assert_eq!(counters.total(0), 2);
        assert_eq!(counters.total(9), 1);
        assert!((0..CLASSES.len()).all(|class| counters.correct(class) <= counters.total(class)));
        assert_eq!(
            counters.overall_percent(),
            Some(100 * counters.correct_count() / 13)
        );
    }
}
