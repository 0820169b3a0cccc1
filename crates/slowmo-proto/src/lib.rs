//! Message types for `proto/run_report.proto`, declared with prost derives.

pub mod proto {
    /// Model contract the learned operator ran with.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ModelContractInfo {
        #[prost(uint32, tag = "1")]
        pub alignment: u32,
        #[prost(string, tag = "2")]
        pub padding: String,
        #[prost(string, tag = "3")]
        pub quantization: String,
        #[prost(string, tag = "4")]
        pub edge: String,
    }

    /// Summary of one interpolation run.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RunReport {
        #[prost(string, tag = "1")]
        pub input_path: String,
        #[prost(string, tag = "2")]
        pub output_path: String,
        #[prost(string, tag = "3")]
        pub operator: String,
        #[prost(uint32, tag = "4")]
        pub multiplier: u32,
        #[prost(float, tag = "5")]
        pub scale: f32,
        #[prost(bool, tag = "6")]
        pub ensemble: bool,
        #[prost(double, tag = "7")]
        pub input_fps: f64,
        #[prost(double, tag = "8")]
        pub output_fps: f64,
        #[prost(uint64, tag = "9")]
        pub frames_read: u64,
        #[prost(uint64, tag = "10")]
        pub frames_written: u64,
        #[prost(uint64, tag = "11")]
        pub frames_interpolated: u64,
        #[prost(uint64, tag = "12")]
        pub samples_exported: u64,
        #[prost(uint64, tag = "13")]
        pub fallbacks: u64,
        #[prost(uint64, tag = "14")]
        pub synthesis_calls: u64,
        #[prost(double, tag = "15")]
        pub elapsed_seconds: f64,
        #[prost(bool, tag = "16")]
        pub success: bool,
        #[prost(bool, tag = "17")]
        pub cancelled: bool,
        #[prost(message, optional, tag = "18")]
        pub contract: Option<ModelContractInfo>,
    }
}

#[cfg(test)]
mod tests {
    use super::proto::{ModelContractInfo, RunReport};
    use prost::Message;

    #[test]
    fn length_delimited_report_decodes() {
        let report = RunReport {
            operator: "learned".into(),
            multiplier: 4,
            frames_written: 9,
            success: true,
            contract: Some(ModelContractInfo {
                alignment: 64,
                padding: "reflect".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut buf = Vec::new();
        report.encode_length_delimited(&mut buf).unwrap();
        let decoded = RunReport::decode_length_delimited(buf.as_slice()).unwrap();
        assert_eq!(decoded, report);
    }
}
