pub mod greeting {
    pub mod v1 {
        tonic::include_proto!("com.corporatebanking.nodejsservice");
    }
}
