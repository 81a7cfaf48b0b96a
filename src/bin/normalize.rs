use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    starschema::apps::run_normalize(std::env::args().skip(1))
}
