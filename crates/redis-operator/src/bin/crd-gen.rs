//! CRD generation binary for the Redis operator

fn main() -> anyhow::Result<()> {
    print!("{}", redis_operator::crd::crd_yaml()?);
    Ok(())
}
