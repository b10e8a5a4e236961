//! Fits a forest on a toy soil dataset and prints how much each reading
//! contributes to the decision.

use croprec_helpers::Classifier;
use ndarray::array;
use random_forest::{ForestParams, RandomForest};

fn main() {
    println!("Random forest feature ranking");
    println!("=============================");

    // nitrogen, rainfall, noise
    let x = array![
        [80.0, 230.0, 1.0],
        [85.0, 210.0, 4.0],
        [78.0, 250.0, 2.0],
        [20.0, 60.0, 3.0],
        [25.0, 70.0, 1.5],
        [18.0, 55.0, 4.5],
        [100.0, 80.0, 2.5],
        [110.0, 75.0, 3.5],
        [95.0, 90.0, 0.5],
    ];
    let y = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
    let names = ["nitrogen", "rainfall", "noise"];
    let crops = ["rice", "chickpea", "cotton"];

    let params = ForestParams {
        n_estimators: 50,
        ..ForestParams::default()
    };
    let mut forest = RandomForest::new(params, 42);
    if let Err(e) = forest.fit(x.view(), &y, crops.len()) {
        println!("   ✗ Failed to fit forest: {}", e);
        return;
    }

    match forest.predict(array![82.0, 220.0, 2.0].view()) {
        Ok(class) => println!("\nPrediction for a wet, nitrogen-rich field: {}", crops[class]),
        Err(e) => println!("\n   ✗ Prediction failed: {}", e),
    }

    if let Some(importances) = forest.feature_importances() {
        let mut ranked: Vec<(&str, f64)> = names
            .iter()
            .copied()
            .zip(importances.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        println!("\nFeature ranking:");
        for (rank, (name, importance)) in ranked.iter().enumerate() {
            println!("{}. {}: {:.2}%", rank + 1, name, importance * 100.0);
        }
    }
}
