#[cfg(test)]
mod split_image_reference_tests {
    use crate::docker::split_image_reference;

    #[test]
    fn defaults_to_latest_tag() {
        assert_eq!(("nginx", "latest"), split_image_reference("nginx"));
        assert_eq!(
            ("strm/helloworld-http", "latest"),
            split_image_reference("strm/helloworld-http")
        );
    }

    #[test]
    fn splits_explicit_tag() {
        assert_eq!(("nginx", "1.25"), split_image_reference("nginx:1.25"));
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        assert_eq!(
            ("localhost:5000/web", "latest"),
            split_image_reference("localhost:5000/web")
        );
        assert_eq!(
            ("localhost:5000/web", "v2"),
            split_image_reference("localhost:5000/web:v2")
        );
    }
}

#[cfg(test)]
mod container_status_from_inspect_tests {
    use serde_json::json;

    use crate::{docker::container_status_from_inspect, task::PortBinding};

    #[test]
    fn reads_status_and_port_bindings() {
        let details = json!({
            "Id": "4f1c",
            "State": { "Status": "running", "Running": true },
            "NetworkSettings": {
                "Ports": {
                    "80/tcp": [
                        { "HostIp": "0.0.0.0", "HostPort": "49153" },
                        { "HostIp": "::", "HostPort": "49153" }
                    ],
                    "443/tcp": null
                }
            }
        });

        let status = container_status_from_inspect(&details);

        assert_eq!("running", status.status);
        assert!(!status.has_exited());
        assert_eq!(
            Some(&vec![
                PortBinding {
                    host_ip: "0.0.0.0".to_owned(),
                    host_port: "49153".to_owned(),
                },
                PortBinding {
                    host_ip: "::".to_owned(),
                    host_port: "49153".to_owned(),
                },
            ]),
            status.ports.get("80/tcp")
        );
        assert_eq!(Some(&vec![]), status.ports.get("443/tcp"));
    }

    #[test]
    fn exited_container_without_network_settings() {
        let details = json!({ "State": { "Status": "exited", "ExitCode": 1 } });

        let status = container_status_from_inspect(&details);

        assert!(status.has_exited());
        assert!(status.ports.is_empty());
    }
}
