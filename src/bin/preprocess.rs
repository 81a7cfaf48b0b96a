use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    starschema::apps::run_preprocess(std::env::args().skip(1))
}
